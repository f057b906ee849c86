//! Wire models for the slotplane tool endpoint.

pub mod models;
