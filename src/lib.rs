//! switchyard - transport-agnostic request dispatch
//!
//! Typed routes decode an inbound message, run a business handler and encode
//! its output. The same routes and middleware serve HTTP requests and chat
//! commands, and every failure is classified once into what the caller sees.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;
