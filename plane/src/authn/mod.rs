//! Authentication: teams, credentials and token resolution

pub mod admin;
pub mod credential;
pub mod resolver;
pub mod store;
