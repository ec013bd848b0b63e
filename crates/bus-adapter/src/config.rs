//! Adapter configuration with validation.
//!
//! Durations are written in humantime form (`"500ms"`, `"30s"`) both in
//! serialized config and in environment variables.

use std::env;
use std::time::Duration;

use bus_transport::ConnectionConfig;
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Identity of this agent on the bus; names its inbox channel
    pub agent_id: String,
    /// Reconnect backoff and heartbeat timings
    pub connection: ConnectionConfig,
    /// Default wait for `request` replies
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
    /// Abandon handlers running longer than this (unbounded when unset)
    #[serde(with = "humantime_serde")]
    pub handler_timeout: Option<Duration>,
    /// Messages buffered between the receive loop and the dispatch worker
    pub dispatch_queue_capacity: usize,
    /// Messages held by the receive loop while the dispatch queue is full;
    /// further messages are dropped until the worker catches up
    pub dispatch_backlog_limit: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent".to_string(),
            connection: ConnectionConfig::default(),
            reply_timeout: Duration::from_secs(30),
            handler_timeout: None,
            dispatch_queue_capacity: 256,
            dispatch_backlog_limit: 4096,
        }
    }
}

impl AdapterConfig {
    /// Defaults with the given agent ID.
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by environment variables, validated.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_AGENT_ID`
    /// - `BUS_INITIAL_BACKOFF`, `BUS_MAX_BACKOFF`, `BUS_HEARTBEAT_INTERVAL`
    /// - `BUS_REPLY_TIMEOUT`
    /// - `BUS_HANDLER_TIMEOUT` (`0` or `off` disables)
    /// - `BUS_DISPATCH_QUEUE`, `BUS_DISPATCH_BACKLOG`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from a key lookup, then validate.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(agent_id) = lookup("BUS_AGENT_ID") {
            self.agent_id = agent_id;
        }
        if let Some(value) = lookup("BUS_INITIAL_BACKOFF") {
            self.connection.initial_backoff = parse_duration("BUS_INITIAL_BACKOFF", &value)?;
        }
        if let Some(value) = lookup("BUS_MAX_BACKOFF") {
            self.connection.max_backoff = parse_duration("BUS_MAX_BACKOFF", &value)?;
        }
        if let Some(value) = lookup("BUS_HEARTBEAT_INTERVAL") {
            self.connection.heartbeat_interval =
                parse_duration("BUS_HEARTBEAT_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("BUS_REPLY_TIMEOUT") {
            self.reply_timeout = parse_duration("BUS_REPLY_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("BUS_HANDLER_TIMEOUT") {
            self.handler_timeout = match value.trim() {
                "0" | "off" | "none" => None,
                other => Some(parse_duration("BUS_HANDLER_TIMEOUT", other)?),
            };
        }
        if let Some(value) = lookup("BUS_DISPATCH_QUEUE") {
            self.dispatch_queue_capacity =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: "BUS_DISPATCH_QUEUE",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("BUS_DISPATCH_BACKLOG") {
            self.dispatch_backlog_limit =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: "BUS_DISPATCH_BACKLOG",
                    value: value.clone(),
                })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.is_empty() {
            return Err(ConfigError::EmptyAgentId);
        }
        if self
            .agent_id
            .chars()
            .any(|c| c == ':' || c.is_whitespace())
        {
            return Err(ConfigError::InvalidAgentId(self.agent_id.clone()));
        }

        let connection = &self.connection;
        if connection.initial_backoff.is_zero() {
            return Err(ConfigError::ZeroDuration("initial_backoff"));
        }
        if connection.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat_interval"));
        }
        if connection.initial_backoff > connection.max_backoff {
            return Err(ConfigError::BackoffRange {
                initial: connection.initial_backoff,
                max: connection.max_backoff,
            });
        }
        if self.reply_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("reply_timeout"));
        }
        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration("handler_timeout"));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueue);
        }

        Ok(())
    }
}

fn parse_duration(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("agent_id cannot be empty")]
    EmptyAgentId,

    #[error("agent_id must not contain ':' or whitespace: {0:?}")]
    InvalidAgentId(String),

    #[error("{0} cannot be 0")]
    ZeroDuration(&'static str),

    #[error("initial_backoff ({initial:?}) exceeds max_backoff ({max:?})")]
    BackoffRange { initial: Duration, max: Duration },

    #[error("dispatch_queue_capacity cannot be 0")]
    ZeroQueue,

    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}
