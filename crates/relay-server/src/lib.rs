//! # relay-server
//!
//! Axum HTTP server that relays broker channels to Server-Sent-Events clients.
//!
//! - `GET /api/v1.0/a1/stream/{session_id}`: one [`StreamSession`](stream::session::StreamSession) per client
//! - `GET /health`: broker reachability probe
//! - `GET /metrics`: Prometheus exposition
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod stream;
