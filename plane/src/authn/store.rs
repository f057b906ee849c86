//! Team and credential store
//!
//! Teams and credentials live in one JSON document (`access.json`). Every
//! change is persisted with an atomic replace and the file is kept at 0600.
//! Raw tokens are never stored; only their SHA-256 is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::authn::credential::{Credential, Role, Scopes, Team};
use crate::errors::PlaneError;
use crate::filesys::file::File;
use crate::utils::{generate_uuid, sha256_hash};

/// Prefix of every issued token
pub const TOKEN_PREFIX: &str = "sp_";

/// Number of hex characters following the prefix
pub const TOKEN_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccessDocument {
    #[serde(default)]
    teams: Vec<Team>,

    #[serde(default)]
    credentials: Vec<Credential>,
}

/// Parameters for a new credential
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub team_id: String,
    pub name: String,
    pub role: Role,
    pub scopes: Scopes,
    pub projects: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct AccessStore {
    doc: RwLock<AccessDocument>,
    file: Option<Arc<File>>,
}

impl AccessStore {
    /// Store without persistence
    pub fn in_memory() -> Self {
        Self {
            doc: RwLock::new(AccessDocument::default()),
            file: None,
        }
    }

    /// Load the store from `file`; a missing file starts empty
    pub async fn load(file: Arc<File>) -> Result<Self, PlaneError> {
        let doc: AccessDocument = file.read_json_opt().await?.unwrap_or_default();
        debug!(
            "Loaded {} team(s) and {} credential(s) from {:?}",
            doc.teams.len(),
            doc.credentials.len(),
            file.path()
        );
        Ok(Self {
            doc: RwLock::new(doc),
            file: Some(file),
        })
    }

    async fn persist(&self, doc: &AccessDocument) -> Result<(), PlaneError> {
        if let Some(file) = &self.file {
            file.write_json_atomic(doc).await?;
            file.set_permissions_600().await?;
        }
        Ok(())
    }

    pub async fn create_team(&self, name: &str, now: DateTime<Utc>) -> Result<Team, PlaneError> {
        let mut doc = self.doc.write().await;
        if doc
            .teams
            .iter()
            .any(|t| t.name == name && t.deleted_at.is_none())
        {
            return Err(PlaneError::Validation(format!(
                "team {} already exists",
                name
            )));
        }

        let team = Team {
            id: generate_uuid(),
            name: name.to_string(),
            created_at: now,
            deleted_at: None,
        };
        let mut next = doc.clone();
        next.teams.push(team.clone());
        self.persist(&next).await?;
        *doc = next;

        info!("Created team {} ({})", team.name, team.id);
        Ok(team)
    }

    pub async fn get_team(&self, team_id: &str) -> Option<Team> {
        let doc = self.doc.read().await;
        doc.teams.iter().find(|t| t.id == team_id).cloned()
    }

    pub async fn find_team_by_name(&self, name: &str) -> Option<Team> {
        let doc = self.doc.read().await;
        doc.teams
            .iter()
            .find(|t| t.name == name && t.deleted_at.is_none())
            .cloned()
    }

    /// Soft-delete a team and deactivate all of its credentials
    pub async fn delete_team(&self, team_id: &str, now: DateTime<Utc>) -> Result<Team, PlaneError> {
        let mut doc = self.doc.write().await;
        let mut next = doc.clone();

        let team = next
            .teams
            .iter_mut()
            .find(|t| t.id == team_id && t.deleted_at.is_none())
            .ok_or_else(|| PlaneError::NotFound(format!("team {}", team_id)))?;
        team.deleted_at = Some(now);
        let deleted = team.clone();

        let mut revoked = 0;
        for cred in next.credentials.iter_mut().filter(|c| c.team_id == team_id) {
            if cred.active {
                cred.active = false;
                cred.revoked_at = Some(now);
                revoked += 1;
            }
        }

        self.persist(&next).await?;
        *doc = next;

        info!(
            "Deleted team {} and revoked {} credential(s)",
            team_id, revoked
        );
        Ok(deleted)
    }

    /// Issue a credential. The raw token is returned once and never stored.
    pub async fn issue(
        &self,
        request: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<(Credential, SecretString), PlaneError> {
        let mut doc = self.doc.write().await;
        if !doc
            .teams
            .iter()
            .any(|t| t.id == request.team_id && t.deleted_at.is_none())
        {
            return Err(PlaneError::NotFound(format!("team {}", request.team_id)));
        }

        let raw = generate_token();
        let credential = Credential {
            id: generate_uuid(),
            team_id: request.team_id,
            name: request.name,
            token_hash: sha256_hash(raw.as_bytes()),
            role: request.role,
            scopes: request.scopes,
            projects: request.projects,
            active: true,
            created_at: now,
            expires_at: request.expires_at,
            revoked_at: None,
        };

        let mut next = doc.clone();
        next.credentials.push(credential.clone());
        self.persist(&next).await?;
        *doc = next;

        info!(
            "Issued {} credential {} for team {}",
            credential.role, credential.id, credential.team_id
        );
        Ok((credential, SecretString::from(raw)))
    }

    pub async fn find_by_token_hash(&self, token_hash: &str) -> Option<Credential> {
        let doc = self.doc.read().await;
        doc.credentials
            .iter()
            .find(|c| c.token_hash == token_hash)
            .cloned()
    }

    /// Deactivate a credential of `team_id`. Revoking twice is a no-op.
    pub async fn revoke(
        &self,
        team_id: &str,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, PlaneError> {
        let mut doc = self.doc.write().await;
        let mut next = doc.clone();

        let cred = next
            .credentials
            .iter_mut()
            .find(|c| c.id == credential_id && c.team_id == team_id)
            .ok_or_else(|| PlaneError::NotFound(format!("credential {}", credential_id)))?;
        if !cred.active {
            return Ok(cred.clone());
        }
        cred.active = false;
        cred.revoked_at = Some(now);
        let revoked = cred.clone();

        self.persist(&next).await?;
        *doc = next;

        info!("Revoked credential {}", credential_id);
        Ok(revoked)
    }

    pub async fn list_credentials(&self, team_id: &str) -> Vec<Credential> {
        let doc = self.doc.read().await;
        doc.credentials
            .iter()
            .filter(|c| c.team_id == team_id)
            .cloned()
            .collect()
    }
}

/// `sp_` followed by 64 random hex characters
fn generate_token() -> String {
    let mut token = String::with_capacity(TOKEN_PREFIX.len() + TOKEN_HEX_LEN);
    token.push_str(TOKEN_PREFIX);
    token.push_str(&uuid::Uuid::new_v4().simple().to_string());
    token.push_str(&uuid::Uuid::new_v4().simple().to_string());
    token
}

/// Shape check before any lookup
pub fn is_well_formed(token: &str) -> bool {
    match token.strip_prefix(TOKEN_PREFIX) {
        Some(hex) => {
            hex.len() == TOKEN_HEX_LEN
                && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        }
        None => false,
    }
}
