//! First-run bootstrap: create a team and its owner credential

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::info;

use crate::authn::credential::{Credential, Role, Scopes, Team};
use crate::authn::store::{AccessStore, NewCredential};
use crate::errors::PlaneError;
use crate::filesys::file::File;

/// Create `team_name` with an owner credential. The raw token is returned
/// once and never persisted.
pub async fn bootstrap_team(
    access_file: File,
    team_name: &str,
    now: DateTime<Utc>,
) -> Result<(Team, Credential, SecretString), PlaneError> {
    let store = AccessStore::load(Arc::new(access_file)).await?;
    bootstrap_with(&store, team_name, now).await
}

pub async fn bootstrap_with(
    store: &AccessStore,
    team_name: &str,
    now: DateTime<Utc>,
) -> Result<(Team, Credential, SecretString), PlaneError> {
    let team = store.create_team(team_name, now).await?;
    let (credential, token) = store
        .issue(
            NewCredential {
                team_id: team.id.clone(),
                name: "bootstrap".to_string(),
                role: Role::Owner,
                scopes: Scopes::All,
                projects: Vec::new(),
                expires_at: None,
            },
            now,
        )
        .await?;
    info!("Bootstrapped team {} ({})", team.name, team.id);
    Ok((team, credential, token))
}
