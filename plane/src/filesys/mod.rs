//! Async file helpers

pub mod dir;
pub mod file;
