//! Integration tests for slotplane


mod test_executor;
mod test_fsm;
mod test_orchestrator;
mod test_permissions;
mod test_server;
