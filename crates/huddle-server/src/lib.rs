//! Huddle Server: WebSocket and HTTP front end for the messaging hub.
//!
//! The binary in `main.rs` wires these modules together; they are exposed
//! as a library so integration tests can drive a real server.

pub mod auth;
pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{Cli, ServerConfig};
