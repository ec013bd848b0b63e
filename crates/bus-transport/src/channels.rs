//! Channel naming convention.
//!
//! Kept stable for interop with other agents on the same broker.

/// Liveness markers; payload is the sending agent's ID.
pub const HEARTBEAT: &str = "bus:global:heartbeat";

/// Broadcast channel every agent subscribes to.
pub const ANNOUNCEMENTS: &str = "bus:global:announcements";

/// Explicit broadcast target for messages not addressed to one agent.
pub const MESSAGES: &str = "bus:global:messages";

/// Private inbox of `agent_id`.
pub fn inbox(agent_id: &str) -> String {
    format!("bus:agent:{agent_id}:inbox")
}

/// Channels an agent's receive loop listens on.
pub fn receive_channels(agent_id: &str) -> Vec<String> {
    vec![inbox(agent_id), ANNOUNCEMENTS.to_string()]
}
