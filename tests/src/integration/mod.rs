//! Integration flows across envelope, transport, telemetry and adapter.

pub mod governance_flows;
pub mod observability;
pub mod reconnect;
pub mod request_reply;
