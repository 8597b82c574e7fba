//! Relay core
//!
//! This module implements the per-connection proxy state machine: upstream
//! link establishment with bounded reconnection, bidirectional frame relay,
//! and heartbeat-driven liveness detection.

pub mod buffer;
pub mod session;
pub mod upstream;

pub use buffer::{OutageBuffer, OutagePolicy};
pub use session::ProxySession;
pub use upstream::{Connect, Transport, UpstreamConnector};
