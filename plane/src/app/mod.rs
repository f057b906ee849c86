//! Application wiring and lifecycle

pub mod bootstrap;
pub mod options;
pub mod run;
pub mod state;
