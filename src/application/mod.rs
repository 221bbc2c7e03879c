//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Dispatch: the request pipeline, codecs, error classification, middleware
//! - Services: business logic behind the routes
//! - Errors: error families shared by every layer

pub mod dispatch;
pub mod errors;
pub mod services;
