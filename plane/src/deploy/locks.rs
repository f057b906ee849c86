//! Per-pair operation locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per (project, environment). Operations on different
/// pairs never wait for each other.
#[derive(Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    pub async fn acquire(&self, project: &str, environment: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry((project.to_string(), environment.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}
