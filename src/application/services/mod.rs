//! Application services - Business logic behind the routes

pub mod user_service;

pub use user_service::{Deleted, FindUser, NewUser, UserRecord, UserService};
