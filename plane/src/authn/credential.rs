//! Teams, roles and credentials

use std::collections::BTreeSet;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Team role, totally ordered `viewer < member < admin < owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Position in the hierarchy. This is the ordering contract; the
    /// declaration order of the variants plays no part in it.
    pub fn rank(self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Member => 1,
            Role::Admin => 2,
            Role::Owner => 3,
        }
    }

    /// True when this role meets or exceeds `required`
    pub fn at_least(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Action names a credential may use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum Scopes {
    /// `*`
    All,

    /// Explicit allow-list of action names
    Only(BTreeSet<String>),
}

impl Scopes {
    pub fn permits(&self, action: &str) -> bool {
        match self {
            Scopes::All => true,
            Scopes::Only(actions) => actions.contains(action),
        }
    }
}

impl From<Vec<String>> for Scopes {
    fn from(list: Vec<String>) -> Self {
        if list.iter().any(|s| s == "*") {
            Scopes::All
        } else {
            Scopes::Only(list.into_iter().collect())
        }
    }
}

impl From<Scopes> for Vec<String> {
    fn from(scopes: Scopes) -> Self {
        match scopes {
            Scopes::All => vec!["*".to_string()],
            Scopes::Only(actions) => actions.into_iter().collect(),
        }
    }
}

/// A team owning projects and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An issued credential. Only the hash of the raw token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub token_hash: String,
    pub role: Role,
    pub scopes: Scopes,

    /// Project allow-list; empty means every project of the team
    #[serde(default)]
    pub projects: Vec<String>,

    pub active: bool,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Credential listing without the hash
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub scopes: Scopes,
    pub projects: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            role: c.role,
            scopes: c.scopes.clone(),
            projects: c.projects.clone(),
            active: c.active,
            created_at: c.created_at,
            expires_at: c.expires_at,
        }
    }
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub team_id: String,
    pub credential_id: String,
    pub role: Role,
    pub scopes: Scopes,

    /// Project allow-list; empty means every project of the team
    pub projects: Vec<String>,
}

impl AuthContext {
    /// Whether the credential's project restriction admits `project`
    pub fn allows_project(&self, project: &str) -> bool {
        self.projects.is_empty() || self.projects.iter().any(|p| p == project)
    }
}
