//! Tool dispatch
//!
//! Authenticates the caller, parses the tool request into its closed params
//! type, gates it, and runs it in a spawned task so a dropped connection
//! cannot abort an operation midway. Every outcome is audited: mutating
//! tools before the response is returned, read-only tools in the background.
//! A mutating tool whose audit write fails is reported as an internal error.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use plane_api::models::{AuditListParams, ToolRequest, ToolResponse};
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::audit::{build_entry, AuditRecorder, AuditSubject};
use crate::authn::admin::AccessAdmin;
use crate::authn::credential::AuthContext;
use crate::authn::resolver::AuthResolverExt;
use crate::authz::permissions::{Action, PermissionGate};
use crate::clock::Clock;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::{AuthError, PlaneError};
use crate::models::audit::{ActorKind, AuditQuery};

pub struct ToolDispatcher {
    resolver: Arc<dyn AuthResolverExt>,
    orchestrator: Arc<Orchestrator>,
    admin: Arc<AccessAdmin>,
    audit: Arc<dyn AuditRecorder>,
    clock: Arc<dyn Clock>,
}

impl ToolDispatcher {
    pub fn new(
        resolver: Arc<dyn AuthResolverExt>,
        orchestrator: Arc<Orchestrator>,
        admin: Arc<AccessAdmin>,
        audit: Arc<dyn AuditRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            admin,
            audit,
            clock,
        }
    }

    /// Handle one tool call end to end
    pub async fn handle(
        self: &Arc<Self>,
        credential: Option<SecretString>,
        body: &[u8],
    ) -> (StatusCode, ToolResponse) {
        // 1. Authenticate
        let auth = match credential {
            Some(token) => self.resolver.resolve(&token).await,
            None => Err(AuthError::Invalid),
        };
        let auth = match auth {
            Ok(auth) => auth,
            Err(e) => {
                warn!("Rejected tool call: {}", e);
                return failure(&PlaneError::Auth(e));
            }
        };

        // 2. Parse into the tool's params type
        let request = match parse_request(body) {
            Ok(request) => request,
            Err(e) => return failure(&e),
        };
        let action = match request.tool_name().parse::<Action>() {
            Ok(action) => action,
            Err(e) => return failure(&PlaneError::Validation(e)),
        };

        // 3. Gate, run and audit off the request task
        let dispatcher = self.clone();
        let task = tokio::spawn(async move { dispatcher.run(auth, action, request).await });
        match task.await {
            Ok(Ok(data)) => (StatusCode::OK, ToolResponse::ok(data)),
            Ok(Err(e)) => failure(&e),
            Err(e) => {
                error!("Tool task for {} failed: {}", action, e);
                failure(&PlaneError::Internal(format!("tool task failed: {}", e)))
            }
        }
    }

    async fn run(
        &self,
        auth: AuthContext,
        action: Action,
        request: ToolRequest,
    ) -> Result<serde_json::Value, PlaneError> {
        let started = Instant::now();
        let (resource, resource_id) = resource_of(&auth, &request);

        let outcome = match PermissionGate::authorize(&auth, action) {
            Ok(()) => self.execute(&auth, request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            debug!("{} by {} failed: {}", action, auth.credential_id, e);
        }

        let entry = build_entry(
            action.as_str(),
            AuditSubject {
                actor: ActorKind::Credential,
                team_id: Some(auth.team_id.clone()),
                credential_id: Some(auth.credential_id.clone()),
                resource,
                resource_id,
            },
            &outcome,
            started.elapsed().as_millis() as u64,
            self.clock.now(),
        );
        if action.is_mutating() {
            if let Err(e) = self.audit.record(entry).await {
                error!("Failed to record audit entry for {}: {}", action, e);
                // The caller must not see success for an unaudited change
                if outcome.is_ok() {
                    return Err(PlaneError::Internal(format!(
                        "{} completed but its audit entry was not persisted: {}",
                        action, e
                    )));
                }
            }
        } else {
            let audit = self.audit.clone();
            tokio::spawn(async move {
                if let Err(e) = audit.record(entry).await {
                    error!("Failed to record audit entry for {}: {}", action, e);
                }
            });
        }

        outcome
    }

    async fn execute(
        &self,
        auth: &AuthContext,
        request: ToolRequest,
    ) -> Result<serde_json::Value, PlaneError> {
        match request {
            ToolRequest::Deploy(params) => to_value(self.orchestrator.deploy(auth, params).await?),
            ToolRequest::Promote(params) => {
                to_value(self.orchestrator.promote(auth, params).await?)
            }
            ToolRequest::Rollback(params) => {
                to_value(self.orchestrator.rollback(auth, params).await?)
            }
            ToolRequest::Cleanup(params) => {
                to_value(self.orchestrator.cleanup(auth, params).await?)
            }
            ToolRequest::Status(params) => to_value(self.orchestrator.status(auth, params).await?),
            ToolRequest::SlotList(_) => to_value(self.orchestrator.list(auth).await?),
            ToolRequest::History(params) => {
                to_value(self.orchestrator.history(auth, params).await?)
            }
            ToolRequest::AuditList(params) => to_value(self.audit_list(auth, params).await?),
            ToolRequest::TeamInfo(_) => to_value(self.admin.team_info(auth).await?),
            ToolRequest::TeamDelete(_) => to_value(self.admin.delete_team(auth).await?),
            ToolRequest::TokenCreate(params) => {
                to_value(self.admin.create_token(auth, params).await?)
            }
            ToolRequest::TokenRevoke(params) => {
                to_value(self.admin.revoke_token(auth, params).await?)
            }
            ToolRequest::TokenList(_) => to_value(self.admin.list_tokens(auth).await?),
        }
    }

    async fn audit_list(
        &self,
        auth: &AuthContext,
        params: AuditListParams,
    ) -> Result<Vec<crate::models::audit::AuditLogEntry>, PlaneError> {
        PermissionGate::authorize(auth, Action::AuditList)?;
        self.audit
            .list(&AuditQuery {
                team_id: Some(auth.team_id.clone()),
                action: params.action,
                limit: params.limit.unwrap_or(50).clamp(1, 1000),
            })
            .await
    }
}

/// Parse `{tool, params}`; a missing `params` means an empty object
pub fn parse_request(body: &[u8]) -> Result<ToolRequest, PlaneError> {
    let mut value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PlaneError::Validation(format!("malformed request body: {}", e)))?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("params")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_value(value)
        .map_err(|e| PlaneError::Validation(format!("invalid tool request: {}", e)))
}

fn resource_of(auth: &AuthContext, request: &ToolRequest) -> (String, String) {
    let pair = |project: &str, environment: &str| {
        ("slots".to_string(), format!("{}/{}", project, environment))
    };
    match request {
        ToolRequest::Deploy(p) => pair(&p.project, &p.environment),
        ToolRequest::Promote(p) => pair(&p.project, &p.environment),
        ToolRequest::Rollback(p) => pair(&p.project, &p.environment),
        ToolRequest::Cleanup(p) => pair(&p.project, &p.environment),
        ToolRequest::Status(p) => pair(&p.project, &p.environment),
        ToolRequest::History(p) => ("deployments".to_string(), format!("{}/{}", p.project, p.environment)),
        ToolRequest::SlotList(_) => ("slots".to_string(), "*".to_string()),
        ToolRequest::AuditList(_) => ("audit".to_string(), auth.team_id.clone()),
        ToolRequest::TeamInfo(_) | ToolRequest::TeamDelete(_) => {
            ("team".to_string(), auth.team_id.clone())
        }
        ToolRequest::TokenCreate(p) => ("credential".to_string(), p.name.clone()),
        ToolRequest::TokenRevoke(p) => ("credential".to_string(), p.credential_id.clone()),
        ToolRequest::TokenList(_) => ("credential".to_string(), "*".to_string()),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, PlaneError> {
    Ok(serde_json::to_value(value)?)
}

fn failure(err: &PlaneError) -> (StatusCode, ToolResponse) {
    (err.status_code(), ToolResponse::err(err.kind(), err.to_string()))
}
