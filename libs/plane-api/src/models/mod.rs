//! Tool API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// A request to the tool endpoint: `{"tool": "<action>", "params": {...}}`.
///
/// Each tool has its own closed params type. Unknown tools and malformed
/// params fail deserialization and are rejected before anything runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", content = "params")]
pub enum ToolRequest {
    #[serde(rename = "deploy.create")]
    Deploy(DeployParams),

    #[serde(rename = "deploy.promote")]
    Promote(PromoteParams),

    #[serde(rename = "deploy.rollback")]
    Rollback(RollbackParams),

    #[serde(rename = "slot.cleanup")]
    Cleanup(CleanupParams),

    #[serde(rename = "slot.status")]
    Status(StatusParams),

    #[serde(rename = "slot.list")]
    SlotList(EmptyParams),

    #[serde(rename = "deploy.history")]
    History(HistoryParams),

    #[serde(rename = "audit.list")]
    AuditList(AuditListParams),

    #[serde(rename = "team.info")]
    TeamInfo(EmptyParams),

    #[serde(rename = "team.delete")]
    TeamDelete(EmptyParams),

    #[serde(rename = "token.create")]
    TokenCreate(TokenCreateParams),

    #[serde(rename = "token.revoke")]
    TokenRevoke(TokenRevokeParams),

    #[serde(rename = "token.list")]
    TokenList(EmptyParams),
}

impl ToolRequest {
    /// Action name as it appears on the wire
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolRequest::Deploy(_) => "deploy.create",
            ToolRequest::Promote(_) => "deploy.promote",
            ToolRequest::Rollback(_) => "deploy.rollback",
            ToolRequest::Cleanup(_) => "slot.cleanup",
            ToolRequest::Status(_) => "slot.status",
            ToolRequest::SlotList(_) => "slot.list",
            ToolRequest::History(_) => "deploy.history",
            ToolRequest::AuditList(_) => "audit.list",
            ToolRequest::TeamInfo(_) => "team.info",
            ToolRequest::TeamDelete(_) => "team.delete",
            ToolRequest::TokenCreate(_) => "token.create",
            ToolRequest::TokenRevoke(_) => "token.revoke",
            ToolRequest::TokenList(_) => "token.list",
        }
    }
}

/// Params for tools that take none
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

/// Deploy a version or image into the inactive slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployParams {
    pub project: String,
    pub environment: String,

    /// Version tag; combined with the configured registry when `image` is absent
    #[serde(default)]
    pub version: Option<String>,

    /// Full image reference
    #[serde(default)]
    pub image: Option<String>,

    /// Skip the post-start health check
    #[serde(default)]
    pub skip_healthcheck: bool,

    /// Port the application listens on inside the container
    #[serde(default)]
    pub container_port: Option<u16>,
}

/// Switch live traffic to the inactive slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteParams {
    pub project: String,
    pub environment: String,

    /// Promote even when the target slot is not healthy
    #[serde(default)]
    pub force: bool,
}

/// Switch live traffic back to the grace slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParams {
    pub project: String,
    pub environment: String,

    #[serde(default)]
    pub reason: Option<String>,
}

/// Retire expired grace slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
    pub project: String,
    pub environment: String,

    /// Retire grace slots even before their window elapses
    #[serde(default)]
    pub force: bool,
}

/// Slot state for one project environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
    pub project: String,
    pub environment: String,

    /// Inspect the containers on the host as well
    #[serde(default)]
    pub live: bool,
}

/// Deployment history for one project environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub project: String,
    pub environment: String,

    #[serde(default)]
    pub limit: Option<usize>,
}

/// Audit log query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListParams {
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub action: Option<String>,
}

/// Issue a new credential for the caller's team
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCreateParams {
    pub name: String,

    /// One of viewer, member, admin, owner
    pub role: String,

    /// Action names, or `["*"]`
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Restrict the credential to these projects (empty means all)
    #[serde(default)]
    pub projects: Vec<String>,

    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// Revoke a credential by id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRevokeParams {
    pub credential_id: String,
}

/// Error body returned on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, e.g. `NoGraceSlot`
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

/// Envelope for every tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ToolResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}
