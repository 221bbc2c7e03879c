//! Dispatch core - transport-agnostic request pipeline
//!
//! A route decodes a raw inbound message into a typed input, runs a business
//! handler and encodes its output, with cross-cutting middleware composed
//! around it once at registration time. Failures go through one classifier
//! that decides what the caller sees and logs everything else.

pub mod classifier;
pub mod codec;
pub mod context;
pub mod middleware;
pub mod parser;
pub mod pipeline;

pub use classifier::{Classification, ErrorClassifier};
pub use codec::{Decoder, Encoder};
pub use context::DispatchContext;
pub use middleware::{
    AllowListMiddleware, DispatchMetrics, LoggingMiddleware, MetricsMiddleware, Middleware,
    MiddlewareChain, Next, RateLimitMiddleware,
};
pub use parser::CommandParser;
pub use pipeline::{into_handler, Endpoint, Inbound, Outcome, Registration, Route, RouteBuilder};
