//! Data models

pub mod audit;
pub mod deployment;
pub mod slot;
