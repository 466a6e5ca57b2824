//! Joulaa realtime chat backend.
//!
//! Authenticated WebSocket connections, conversation fan-out, and streamed
//! agent replies from the configured LLM provider.

pub mod auth;
pub mod config;
pub mod core;
pub mod database;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod realtime;
pub mod ws;

pub use crate::config::AppConfig;
pub use crate::core::AppState;
