//! Deployment history models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::slot::SlotName;

/// Lifecycle of a single deploy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// One step of a deploy, in the order it ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStep {
    pub name: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

/// Append-only record of a deploy attempt.
///
/// Only promote and rollback annotate a record after it completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub project_name: String,
    pub environment: String,
    pub slot: SlotName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub image: String,
    pub status: DeploymentStatus,

    /// Credential id of the deployer
    pub deployed_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,

    #[serde(default)]
    pub steps: Vec<DeploymentStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    /// A new record in `pending`
    pub fn pending(
        project_name: &str,
        environment: &str,
        slot: SlotName,
        version: Option<String>,
        image: &str,
        deployed_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            project_name: project_name.to_string(),
            environment: environment.to_string(),
            slot,
            version,
            image: image.to_string(),
            status: DeploymentStatus::Pending,
            deployed_by: deployed_by.to_string(),
            promoted_at: None,
            promoted_by: None,
            rolled_back_at: None,
            rolled_back_by: None,
            rollback_reason: None,
            steps: Vec::new(),
            error: None,
            duration_ms: 0,
            created_at: now,
            completed_at: None,
        }
    }

    /// Record a finished step
    pub fn push_step(
        &mut self,
        name: &str,
        result: Result<(), String>,
        duration_ms: u64,
        at: DateTime<Utc>,
    ) {
        let (success, message) = match result {
            Ok(()) => (true, None),
            Err(message) => (false, Some(message)),
        };
        self.steps.push(DeploymentStep {
            name: name.to_string(),
            success,
            message,
            duration_ms,
            at,
        });
    }

    /// Close the record as `success` or `failed`
    pub fn finish(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.status = if error.is_some() {
            DeploymentStatus::Failed
        } else {
            DeploymentStatus::Success
        };
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = (now - self.created_at).num_milliseconds().max(0) as u64;
    }
}
