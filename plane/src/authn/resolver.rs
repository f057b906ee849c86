//! Credential resolution

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::authn::credential::AuthContext;
use crate::authn::store::{is_well_formed, AccessStore};
use crate::clock::Clock;
use crate::errors::AuthError;
use crate::utils::sha256_hash;

/// Resolver trait for testability
#[async_trait]
pub trait AuthResolverExt: Send + Sync {
    /// Map a raw bearer token to the identity it carries
    async fn resolve(&self, token: &SecretString) -> Result<AuthContext, AuthError>;
}

pub struct AuthResolver {
    store: Arc<AccessStore>,
    clock: Arc<dyn Clock>,
}

impl AuthResolver {
    pub fn new(store: Arc<AccessStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl AuthResolverExt for AuthResolver {
    async fn resolve(&self, token: &SecretString) -> Result<AuthContext, AuthError> {
        let raw = token.expose_secret();
        if !is_well_formed(raw) {
            return Err(AuthError::Invalid);
        }

        let credential = self
            .store
            .find_by_token_hash(&sha256_hash(raw.as_bytes()))
            .await
            .ok_or(AuthError::Invalid)?;

        if !credential.active {
            debug!("Rejected revoked credential {}", credential.id);
            return Err(AuthError::Revoked);
        }

        match self.store.get_team(&credential.team_id).await {
            Some(team) if team.deleted_at.is_none() => {}
            _ => return Err(AuthError::Revoked),
        }

        if let Some(expires_at) = credential.expires_at {
            if expires_at <= self.clock.now() {
                debug!("Rejected expired credential {}", credential.id);
                return Err(AuthError::Expired);
            }
        }

        Ok(AuthContext {
            team_id: credential.team_id,
            credential_id: credential.id,
            role: credential.role,
            scopes: credential.scopes,
            projects: credential.projects,
        })
    }
}
