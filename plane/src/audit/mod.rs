//! Audit log
//!
//! Append-only. The file backend writes one JSON object per line and syncs
//! before `record` returns.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::PlaneError;
use crate::filesys::file::File;
use crate::models::audit::{ActorKind, AuditLogEntry, AuditQuery};
use crate::utils::generate_uuid;

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Persist `entry` durably
    async fn record(&self, entry: AuditLogEntry) -> Result<(), PlaneError>;

    /// Entries matching `query`, newest first
    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, PlaneError>;
}

/// Who and what an entry is about
#[derive(Debug, Clone)]
pub struct AuditSubject {
    pub actor: ActorKind,
    pub team_id: Option<String>,
    pub credential_id: Option<String>,
    pub resource: String,
    pub resource_id: String,
}

/// Build an entry from an operation outcome
pub fn build_entry<T>(
    action: &str,
    subject: AuditSubject,
    outcome: &Result<T, PlaneError>,
    duration_ms: u64,
    now: DateTime<Utc>,
) -> AuditLogEntry {
    let (success, error_kind, error) = match outcome {
        Ok(_) => (true, None, None),
        Err(e) => (false, Some(e.kind().to_string()), Some(e.to_string())),
    };
    AuditLogEntry {
        id: generate_uuid(),
        action: action.to_string(),
        actor: subject.actor,
        team_id: subject.team_id,
        credential_id: subject.credential_id,
        resource: subject.resource,
        resource_id: subject.resource_id,
        success,
        duration_ms,
        timestamp: now,
        error_kind,
        error,
    }
}

pub struct FileAuditRecorder {
    file: File,
    write_lock: Mutex<()>,
}

impl FileAuditRecorder {
    pub fn new(file: File) -> Self {
        Self {
            file,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditRecorder for FileAuditRecorder {
    async fn record(&self, entry: AuditLogEntry) -> Result<(), PlaneError> {
        let line = serde_json::to_string(&entry)?;
        let _guard = self.write_lock.lock().await;
        self.file.append_line(&line).await
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, PlaneError> {
        let mut entries = Vec::new();
        if query.limit == 0 {
            return Ok(entries);
        }
        let contents = self.file.read_string_opt().await?.unwrap_or_default();
        for line in contents.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(line) {
                Ok(entry) if query.matches(&entry) => {
                    entries.push(entry);
                    if entries.len() >= query.limit {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed audit line: {}", e),
            }
        }
        Ok(entries)
    }
}

/// Audit log held in memory
#[derive(Default)]
pub struct MemoryAuditRecorder {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAuditRecorder {
    /// Every entry in the order recorded
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, entry: AuditLogEntry) -> Result<(), PlaneError> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, PlaneError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect())
    }
}
