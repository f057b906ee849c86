//! In-memory caches

pub mod slots;
