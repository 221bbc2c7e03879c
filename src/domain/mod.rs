//! Domain layer - Core objects with no transport dependencies
//!
//! This layer contains:
//! - Entities: chat messages and users
//! - Traits: abstractions for infrastructure (ChatSession)

pub mod entities;
pub mod traits;
