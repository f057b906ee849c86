//! Remote execution on target hosts

pub mod command;
pub mod executor;
pub mod http;
pub mod ssh;

pub use command::{ContainerSpec, RemoteCommand};
pub use executor::{CommandOutput, PooledExecutor, RemoteExecutor, RunOptions, Transport};
