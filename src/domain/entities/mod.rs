//! Domain entities - Core objects with no transport dependencies

pub mod message;
pub mod user;

pub use message::{Content, Message};
pub use user::User;
