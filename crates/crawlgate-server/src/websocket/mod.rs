//! WebSocket connection state, registry, and session lifecycle.

pub mod registry;
pub mod session;
