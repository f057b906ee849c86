//! Deployment module

pub mod fsm;
pub mod locks;
pub mod orchestrator;
pub mod ports;
pub mod records;
