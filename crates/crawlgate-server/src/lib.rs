//! # crawlgate-server
//!
//! The client-facing gateway of the crawling platform:
//!
//! - Axum HTTP + `WebSocket` server (`/job` upgrade, `/health`,
//!   `/metrics`)
//! - Connection registry mapping client ids to live sessions
//! - Per-session inbound loop (job submissions → broker) and a
//!   single outbound writer task per session
//! - Singleton result dispatcher (broker → originating session)
//! - Idle sweep and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sweep;
pub mod websocket;
