//! Authorization

pub mod permissions;
