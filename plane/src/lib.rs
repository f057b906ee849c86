//! slotplane library
//!
//! Blue-green slot deployment control plane: slot registry, deployment
//! orchestration, access control and the tool endpoint.

pub mod app;
pub mod audit;
pub mod authn;
pub mod authz;
pub mod cache;
pub mod clock;
pub mod deploy;
pub mod envstore;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod registry;
pub mod remote;
pub mod routing;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
