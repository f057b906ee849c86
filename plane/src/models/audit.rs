//! Audit log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who performed an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    /// A request authenticated with a credential
    Credential,

    /// The grace cleanup scheduler
    Scheduler,
}

/// Write-once audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub action: String,
    pub actor: ActorKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,

    /// Resource type, e.g. `slots` or `credential`
    pub resource: String,

    /// Resource identifier, e.g. `checkout/staging`
    pub resource_id: String,

    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter for listing audit entries, newest first
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub team_id: Option<String>,
    pub action: Option<String>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(team_id) = &self.team_id {
            if entry.team_id.as_deref() != Some(team_id.as_str()) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        true
    }
}
