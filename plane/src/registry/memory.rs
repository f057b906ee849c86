//! In-memory slot registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::errors::PlaneError;
use crate::models::slot::{HealthStatus, ProjectSlots, SlotName, SlotState};
use crate::registry::{
    apply_health_update, apply_state_update, apply_upsert, not_found, SlotRegistry,
};

type Key = (String, String);

/// Slot registry held in process memory.
///
/// Used for development runs and tests. `set_available(false)` makes every
/// call fail with `RegistryUnavailable`, which is how outages are exercised.
pub struct MemorySlotRegistry {
    entries: RwLock<HashMap<Key, ProjectSlots>>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemorySlotRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), PlaneError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaneError::RegistryUnavailable(
                "in-memory registry marked unavailable".to_string(),
            ))
        }
    }

    fn key(project: &str, environment: &str) -> Key {
        (project.to_string(), environment.to_string())
    }
}

impl Default for MemorySlotRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl SlotRegistry for MemorySlotRegistry {
    async fn get(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<Option<ProjectSlots>, PlaneError> {
        self.ensure_available()?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&Self::key(project, environment)).cloned())
    }

    async fn upsert(&self, slots: ProjectSlots) -> Result<ProjectSlots, PlaneError> {
        self.ensure_available()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(&slots.project_name, &slots.environment);
        let stored = apply_upsert(entries.get(&key), slots, self.clock.now())?;
        entries.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_slot_state(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        state: SlotState,
    ) -> Result<ProjectSlots, PlaneError> {
        self.ensure_available()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(project, environment);
        let current = entries
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(project, environment))?;
        let stored = apply_state_update(current, slot, state, self.clock.now())?;
        entries.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_slot_health(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        health: HealthStatus,
    ) -> Result<ProjectSlots, PlaneError> {
        self.ensure_available()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(project, environment);
        let current = entries
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(project, environment))?;
        let stored = apply_health_update(current, slot, health, self.clock.now());
        entries.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ProjectSlots>, PlaneError> {
        self.ensure_available()?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ProjectSlots> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(all)
    }
}
