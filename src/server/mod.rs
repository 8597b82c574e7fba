//! Network-facing boundary: TCP accept loop and WebSocket upgrade.

pub mod listener;
