//! Team and credential administration

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use plane_api::models::{TokenCreateParams, TokenRevokeParams};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::info;

use crate::authn::credential::{AuthContext, CredentialSummary, Role, Scopes, Team};
use crate::authn::store::{AccessStore, NewCredential};
use crate::authz::permissions::{Action, PermissionGate};
use crate::clock::Clock;
use crate::errors::PlaneError;
use crate::registry::SlotRegistry;
use crate::utils::validate_name;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInfo {
    pub team: Team,
    pub projects: Vec<String>,
    pub role: Role,
    pub credential_id: String,
}

/// Returned once on issue; the raw token is never shown again
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub credential: CredentialSummary,
    pub token: String,
}

pub struct AccessAdmin {
    store: Arc<AccessStore>,
    registry: Arc<dyn SlotRegistry>,
    clock: Arc<dyn Clock>,
}

impl AccessAdmin {
    pub fn new(
        store: Arc<AccessStore>,
        registry: Arc<dyn SlotRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    async fn team(&self, auth: &AuthContext) -> Result<Team, PlaneError> {
        self.store
            .get_team(&auth.team_id)
            .await
            .ok_or_else(|| PlaneError::NotFound(format!("team {}", auth.team_id)))
    }

    pub async fn team_info(&self, auth: &AuthContext) -> Result<TeamInfo, PlaneError> {
        PermissionGate::authorize(auth, Action::TeamInfo)?;
        let team = self.team(auth).await?;

        let mut projects: Vec<String> = self
            .registry
            .list_by_team(&auth.team_id)
            .await?
            .into_iter()
            .map(|p| p.project_name)
            .collect();
        projects.dedup();

        Ok(TeamInfo {
            team,
            projects,
            role: auth.role,
            credential_id: auth.credential_id.clone(),
        })
    }

    /// Soft-delete the caller's team. Refused while it still owns slots.
    pub async fn delete_team(&self, auth: &AuthContext) -> Result<Team, PlaneError> {
        PermissionGate::authorize(auth, Action::TeamDelete)?;

        let owned = self.registry.list_by_team(&auth.team_id).await?;
        if !owned.is_empty() {
            return Err(PlaneError::TeamNotEmpty(owned.len()));
        }
        self.store.delete_team(&auth.team_id, self.clock.now()).await
    }

    /// Issue a credential for the caller's team, never above the caller's role
    pub async fn create_token(
        &self,
        auth: &AuthContext,
        params: TokenCreateParams,
    ) -> Result<IssuedToken, PlaneError> {
        PermissionGate::authorize(auth, Action::TokenCreate)?;

        let role: Role = params.role.parse().map_err(PlaneError::Validation)?;
        if !auth.role.at_least(role) {
            return Err(PlaneError::PermissionDenied(format!(
                "cannot issue a {} credential with role {}",
                role, auth.role
            )));
        }
        if params.name.trim().is_empty() {
            return Err(PlaneError::Validation("token name is required".to_string()));
        }
        for scope in params.scopes.iter().filter(|s| s.as_str() != "*") {
            scope
                .parse::<Action>()
                .map_err(|_| PlaneError::Validation(format!("unknown scope: {}", scope)))?;
        }
        for project in &params.projects {
            validate_name("project", project).map_err(PlaneError::Validation)?;
        }

        let now = self.clock.now();
        let expires_at: Option<DateTime<Utc>> = params
            .expires_in_days
            .map(|days| now + Duration::days(days as i64));
        let scopes = if params.scopes.is_empty() {
            Scopes::All
        } else {
            Scopes::from(params.scopes)
        };

        let (credential, raw) = self
            .store
            .issue(
                NewCredential {
                    team_id: auth.team_id.clone(),
                    name: params.name,
                    role,
                    scopes,
                    projects: params.projects,
                    expires_at,
                },
                now,
            )
            .await?;

        info!(
            "Credential {} issued by {}",
            credential.id, auth.credential_id
        );
        Ok(IssuedToken {
            credential: CredentialSummary::from(&credential),
            token: raw.expose_secret().to_string(),
        })
    }

    pub async fn revoke_token(
        &self,
        auth: &AuthContext,
        params: TokenRevokeParams,
    ) -> Result<CredentialSummary, PlaneError> {
        PermissionGate::authorize(auth, Action::TokenRevoke)?;
        let revoked = self
            .store
            .revoke(&auth.team_id, &params.credential_id, self.clock.now())
            .await?;
        Ok(CredentialSummary::from(&revoked))
    }

    pub async fn list_tokens(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<CredentialSummary>, PlaneError> {
        PermissionGate::authorize(auth, Action::TokenList)?;
        Ok(self
            .store
            .list_credentials(&auth.team_id)
            .await
            .iter()
            .map(CredentialSummary::from)
            .collect())
    }
}
