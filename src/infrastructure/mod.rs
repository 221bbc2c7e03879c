//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Transport: HTTP and chat-command bindings of the dispatch pipeline
//! - Adapters: chat platform sessions (console, Telegram)
//! - Database and HTTP client: collaborators used by business handlers
//! - Server: the HTTP runner

pub mod adapters;
pub mod config;
pub mod database;
pub mod http_client;
pub mod server;
pub mod transport;
