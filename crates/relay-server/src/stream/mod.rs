//! Per-client stream: event framing, the session loop, and the HTTP handler.

pub mod event;
pub mod handler;
pub mod session;
