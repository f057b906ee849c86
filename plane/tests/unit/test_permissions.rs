//! Permission table tests

use std::collections::BTreeSet;

use tokio_test::{assert_err, assert_ok};

use slotplane::authn::credential::{AuthContext, Role, Scopes};
use slotplane::authz::permissions::{Action, PermissionGate};

fn ctx(role: Role, scopes: Scopes) -> AuthContext {
    AuthContext {
        team_id: "team-1".to_string(),
        credential_id: "cred-1".to_string(),
        role,
        scopes,
        projects: Vec::new(),
    }
}

fn only(actions: &[&str]) -> Scopes {
    Scopes::Only(actions.iter().map(|a| a.to_string()).collect::<BTreeSet<_>>())
}

#[test]
fn test_each_role_gets_exactly_its_actions() {
    let expected: [(Role, &[Action]); 4] = [
        (
            Role::Viewer,
            &[Action::SlotStatus, Action::SlotList, Action::DeployHistory, Action::TeamInfo],
        ),
        (
            Role::Member,
            &[
                Action::SlotStatus,
                Action::SlotList,
                Action::DeployHistory,
                Action::TeamInfo,
                Action::DeployCreate,
                Action::DeployPromote,
                Action::DeployRollback,
            ],
        ),
        (
            Role::Admin,
            &[
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
            ],
        ),
        (Role::Owner, &Action::ALL),
    ];

    for (role, allowed) in expected {
        let auth = ctx(role, Scopes::All);
        for action in Action::ALL {
            assert_eq!(
                PermissionGate::check(&auth, action),
                allowed.contains(&action),
                "{} / {}",
                role,
                action
            );
        }
    }
}

#[test]
fn test_scope_list_narrows_role() {
    let auth = ctx(Role::Owner, only(&["slot.status", "deploy.create"]));
    assert!(PermissionGate::check(&auth, Action::DeployCreate));
    assert!(PermissionGate::check(&auth, Action::SlotStatus));
    assert!(!PermissionGate::check(&auth, Action::DeployPromote));
    assert!(!PermissionGate::check(&auth, Action::TeamDelete));
}

#[test]
fn test_scope_cannot_raise_role() {
    let auth = ctx(Role::Viewer, only(&["deploy.create", "deploy.promote"]));
    assert!(!PermissionGate::check(&auth, Action::DeployCreate));
    assert_err!(PermissionGate::authorize(&auth, Action::DeployPromote));
}

#[test]
fn test_project_allow_list() {
    let mut auth = ctx(Role::Member, Scopes::All);
    auth.projects = vec!["checkout".to_string()];

    assert_ok!(PermissionGate::authorize_project(&auth, Action::DeployCreate, "checkout"));
    assert_err!(PermissionGate::authorize_project(&auth, Action::DeployCreate, "billing"));
}

#[test]
fn test_role_ordering() {
    assert!(Role::Owner.at_least(Role::Admin));
    assert!(Role::Admin.at_least(Role::Admin));
    assert!(!Role::Member.at_least(Role::Admin));
    assert!(Role::Viewer.at_least(Role::Viewer));
}
