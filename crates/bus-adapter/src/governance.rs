//! Governance interceptor chain.
//!
//! Every envelope crossing the adapter boundary, in either direction, passes
//! through an ordered list of [`Policy`] predicates. The first deny wins and
//! later policies are not consulted. An empty chain allows everything.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bus_envelope::{Direction, Envelope};
use thiserror::Error;

/// Outcome of a single policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A governance predicate over an envelope and its direction.
///
/// Evaluation must not depend on anything but its inputs and the policy's
/// own configuration.
pub trait Policy: Send + Sync {
    /// Label used in violation metrics and logs.
    fn name(&self) -> &str;

    fn evaluate(&self, envelope: &Envelope, direction: Direction) -> PolicyDecision;
}

/// A message blocked by governance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Policy '{policy}' blocked {direction} message: {reason}")]
pub struct PolicyViolation {
    pub policy: String,
    pub direction: Direction,
    pub reason: String,
}

/// Ordered list of policies.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    policies: Vec<Arc<dyn Policy>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy (builder form).
    #[must_use]
    pub fn with_policy(mut self, policy: impl Policy + 'static) -> Self {
        self.push(Arc::new(policy));
        self
    }

    /// Append a policy to the end of the chain.
    pub fn push(&mut self, policy: Arc<dyn Policy>) {
        self.policies.push(policy);
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy names in evaluation order.
    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Evaluate without taking ownership.
    pub fn check(&self, envelope: &Envelope, direction: Direction) -> Result<(), PolicyViolation> {
        for policy in &self.policies {
            if let PolicyDecision::Deny { reason } = policy.evaluate(envelope, direction) {
                return Err(PolicyViolation {
                    policy: policy.name().to_string(),
                    direction,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Pass the envelope through, or return the first violation.
    pub fn intercept(
        &self,
        envelope: Envelope,
        direction: Direction,
    ) -> Result<Envelope, PolicyViolation> {
        self.check(&envelope, direction)?;
        Ok(envelope)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("policies", &self.policy_names())
            .finish()
    }
}

/// Policy from a closure.
pub struct FnPolicy<F> {
    name: String,
    predicate: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&Envelope, Direction) -> PolicyDecision + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Policy for FnPolicy<F>
where
    F: Fn(&Envelope, Direction) -> PolicyDecision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, envelope: &Envelope, direction: Direction) -> PolicyDecision {
        (self.predicate)(envelope, direction)
    }
}

/// Blocks every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Policy for DenyAll {
    fn name(&self) -> &str {
        "deny-all"
    }

    fn evaluate(&self, _envelope: &Envelope, _direction: Direction) -> PolicyDecision {
        PolicyDecision::deny("all traffic is denied")
    }
}

/// Accepts inbound messages only from listed senders.
///
/// Outbound messages are always allowed; their sender is this agent.
#[derive(Debug, Clone)]
pub struct SenderAllowlist {
    allowed: HashSet<String>,
}

impl SenderAllowlist {
    pub fn new<I, S>(senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: senders.into_iter().map(Into::into).collect(),
        }
    }
}

impl Policy for SenderAllowlist {
    fn name(&self) -> &str {
        "sender-allowlist"
    }

    fn evaluate(&self, envelope: &Envelope, direction: Direction) -> PolicyDecision {
        if direction == Direction::Out || self.allowed.contains(envelope.sender()) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::deny(format!("sender '{}' is not allowed", envelope.sender()))
        }
    }
}

/// Blocks listed message types in both directions.
#[derive(Debug, Clone)]
pub struct MessageTypeDenylist {
    denied: HashSet<String>,
}

impl MessageTypeDenylist {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl Policy for MessageTypeDenylist {
    fn name(&self) -> &str {
        "message-type-denylist"
    }

    fn evaluate(&self, envelope: &Envelope, _direction: Direction) -> PolicyDecision {
        if self.denied.contains(envelope.message_type()) {
            PolicyDecision::deny(format!(
                "message type '{}' is denied",
                envelope.message_type()
            ))
        } else {
            PolicyDecision::Allow
        }
    }
}
