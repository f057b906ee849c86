//! Permission table and gate
//!
//! `Action::required_role` is the single table deciding who may do what.
//! Every mutation path calls `PermissionGate::authorize` before it touches
//! shared state.

use std::fmt;
use std::str::FromStr;

use crate::authn::credential::{AuthContext, Role};
use crate::errors::PlaneError;

/// A named, permission-checked action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SlotStatus,
    SlotList,
    DeployHistory,
    TeamInfo,
    DeployCreate,
    DeployPromote,
    DeployRollback,
    SlotCleanup,
    AuditList,
    TokenList,
    TokenCreate,
    TokenRevoke,
    TeamDelete,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::SlotStatus,
        Action::SlotList,
        Action::DeployHistory,
        Action::TeamInfo,
        Action::DeployCreate,
        Action::DeployPromote,
        Action::DeployRollback,
        Action::SlotCleanup,
        Action::AuditList,
        Action::TokenList,
        Action::TokenCreate,
        Action::TokenRevoke,
        Action::TeamDelete,
    ];

    /// Wire name, also used in scope lists and audit entries
    pub fn as_str(self) -> &'static str {
        match self {
            Action::SlotStatus => "slot.status",
            Action::SlotList => "slot.list",
            Action::DeployHistory => "deploy.history",
            Action::TeamInfo => "team.info",
            Action::DeployCreate => "deploy.create",
            Action::DeployPromote => "deploy.promote",
            Action::DeployRollback => "deploy.rollback",
            Action::SlotCleanup => "slot.cleanup",
            Action::AuditList => "audit.list",
            Action::TokenList => "token.list",
            Action::TokenCreate => "token.create",
            Action::TokenRevoke => "token.revoke",
            Action::TeamDelete => "team.delete",
        }
    }

    /// Minimum role for the action
    pub fn required_role(self) -> Role {
        match self {
            Action::SlotStatus | Action::SlotList | Action::DeployHistory | Action::TeamInfo => {
                Role::Viewer
            }
            Action::DeployCreate | Action::DeployPromote | Action::DeployRollback => Role::Member,
            Action::SlotCleanup
            | Action::AuditList
            | Action::TokenList
            | Action::TokenCreate
            | Action::TokenRevoke => Role::Admin,
            Action::TeamDelete => Role::Owner,
        }
    }

    /// Mutating actions are audited synchronously
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Action::DeployCreate
                | Action::DeployPromote
                | Action::DeployRollback
                | Action::SlotCleanup
                | Action::TokenCreate
                | Action::TokenRevoke
                | Action::TeamDelete
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}

/// Evaluates (role, scopes) against the permission table
pub struct PermissionGate;

impl PermissionGate {
    /// True iff the scopes name the action (or are a wildcard) and the role
    /// ranks at or above the action's minimum role
    pub fn check(auth: &AuthContext, action: Action) -> bool {
        auth.scopes.permits(action.as_str()) && auth.role.at_least(action.required_role())
    }

    /// `check`, as a `PermissionDenied` error
    pub fn authorize(auth: &AuthContext, action: Action) -> Result<(), PlaneError> {
        if !auth.scopes.permits(action.as_str()) {
            return Err(PlaneError::PermissionDenied(format!(
                "credential scopes do not include {}",
                action
            )));
        }
        if !auth.role.at_least(action.required_role()) {
            return Err(PlaneError::PermissionDenied(format!(
                "{} requires role {} (have {})",
                action,
                action.required_role(),
                auth.role
            )));
        }
        Ok(())
    }

    /// Gate plus project restriction
    pub fn authorize_project(
        auth: &AuthContext,
        action: Action,
        project: &str,
    ) -> Result<(), PlaneError> {
        Self::authorize(auth, action)?;
        if !auth.allows_project(project) {
            return Err(PlaneError::PermissionDenied(format!(
                "credential is not allowed to access project {}",
                project
            )));
        }
        Ok(())
    }
}
