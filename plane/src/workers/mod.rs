//! Background workers

pub mod grace_cleanup;
