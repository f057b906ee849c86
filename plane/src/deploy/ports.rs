//! Slot port allocation
//!
//! A new pair gets the lowest free `(p, p + 1)` at or above the
//! environment's base port on its host. Ports stay with the pair for life.

use std::collections::HashSet;

use tokio::sync::{Mutex, MutexGuard};

use crate::errors::PlaneError;
use crate::models::slot::ProjectSlots;

/// Serializes allocation so two new pairs cannot pick the same ports. Hold
/// the guard until the new pair is stored.
#[derive(Default)]
pub struct PortAllocator {
    lock: Mutex<()>,
}

impl PortAllocator {
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Lowest free pair at or above `base_port` given every stored pair
pub fn allocate(
    existing: &[ProjectSlots],
    host: &str,
    base_port: u16,
) -> Result<(u16, u16), PlaneError> {
    let used: HashSet<u16> = existing
        .iter()
        .filter(|s| s.host == host)
        .flat_map(|s| [s.blue.port, s.green.port])
        .collect();

    let mut port = base_port;
    while port < u16::MAX {
        if !used.contains(&port) && !used.contains(&(port + 1)) {
            return Ok((port, port + 1));
        }
        port += 1;
    }
    Err(PlaneError::ConfigError(format!(
        "no free port pair at or above {} on {}",
        base_port, host
    )))
}
