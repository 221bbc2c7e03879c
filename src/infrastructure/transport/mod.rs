//! Transport bindings - adapt the dispatch pipeline to HTTP and chat commands

pub mod chat;
pub mod http;

pub use chat::{command, fallback_text, raw_command, ChatRoute, ChatRouter};
pub use http::{endpoint, error_response, json_response, HttpRequest, HttpRoute, HttpSelector, HttpTransport};
