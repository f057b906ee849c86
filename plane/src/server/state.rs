//! Server state

use std::sync::Arc;

use crate::server::dispatch::ToolDispatcher;

/// Server state shared across handlers
pub struct ServerState {
    pub dispatcher: Arc<ToolDispatcher>,
}

impl ServerState {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}
