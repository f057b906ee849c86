//! Last-known slot state
//!
//! Every registry read and write refreshes the cache. When the registry is
//! unavailable, status queries are served from here and marked stale.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::models::slot::ProjectSlots;

/// Slot cache entry
#[derive(Debug, Clone)]
pub struct SlotCacheEntry {
    pub slots: ProjectSlots,
    pub cached_at: DateTime<Utc>,
}

/// In-memory slot cache
pub struct SlotCache {
    entries: RwLock<HashMap<String, SlotCacheEntry>>,
    capacity: usize,
}

impl SlotCache {
    /// Create a new slot cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn key(project: &str, environment: &str) -> String {
        format!("{}/{}", project, environment)
    }

    /// Get the last-known pair
    pub fn get(&self, project: &str, environment: &str) -> Option<SlotCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&Self::key(project, environment)).cloned()
    }

    /// Insert a pair, replacing any older copy
    pub fn insert(&self, slots: ProjectSlots, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = slots.key();

        // Only keep a copy that is at least as new as the cached one
        if let Some(existing) = entries.get(&key) {
            if existing.slots.version > slots.version {
                return;
            }
        }

        // Evict oldest if at capacity
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            SlotCacheEntry {
                slots,
                cached_at: now,
            },
        );
    }

    /// Every cached pair of one team
    pub fn list_by_team(&self, team_id: &str) -> Vec<ProjectSlots> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut slots: Vec<ProjectSlots> = entries
            .values()
            .filter(|e| e.slots.team_id == team_id)
            .map(|e| e.slots.clone())
            .collect();
        slots.sort_by(|a, b| a.key().cmp(&b.key()));
        slots
    }

    /// Get cache size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SlotCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
