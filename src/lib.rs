//! wsrelay - Transparent WebSocket Relay
//!
//! A drop-in WebSocket endpoint that relays every frame to a single fixed
//! upstream service and back, healing the upstream link behind the client's
//! back through bounded, fixed-delay reconnection.

pub mod config;
pub mod events;
pub mod registry;
pub mod relay;
pub mod server;
