//! FSM unit tests

use chrono::{Duration, Utc};
use tokio_test::{assert_err, assert_ok};

use slotplane::deploy::fsm::{next_state, SlotEvent};
use slotplane::errors::PlaneError;
use slotplane::models::slot::{HealthStatus, Slot, SlotState};

fn deploy(version: &str, health: HealthStatus) -> SlotEvent {
    SlotEvent::Deploy {
        version: Some(version.to_string()),
        image: format!("registry.local/app:{}", version),
        deployed_by: "cred-1".to_string(),
        deployed_at: Utc::now(),
        health,
    }
}

#[test]
fn test_fsm_full_lifecycle() {
    let mut slot = Slot::empty(4000);

    // empty -> deployed
    assert_ok!(slot.process(deploy("v1", HealthStatus::Healthy)));
    assert_eq!(slot.state, SlotState::Deployed);
    assert_eq!(slot.version.as_deref(), Some("v1"));

    // deployed -> active
    slot.process(SlotEvent::Promote).unwrap();
    assert_eq!(slot.state, SlotState::Active);

    // active -> grace
    let expires_at = Utc::now() + Duration::hours(48);
    slot.process(SlotEvent::Demote { expires_at }).unwrap();
    assert_eq!(slot.state, SlotState::Grace);
    assert_eq!(slot.grace_expires_at, Some(expires_at));

    // grace -> empty
    slot.process(SlotEvent::Expire).unwrap();
    assert_eq!(slot.state, SlotState::Empty);
    assert_eq!(slot.port, 4000);
    assert!(slot.version.is_none());
    assert!(slot.grace_expires_at.is_none());
}

#[test]
fn test_fsm_rollback_flow() {
    let mut old = Slot::empty(4000);
    old.process(deploy("v1", HealthStatus::Healthy)).unwrap();
    old.process(SlotEvent::Promote).unwrap();
    old.process(SlotEvent::Demote {
        expires_at: Utc::now() + Duration::hours(1),
    })
    .unwrap();

    let mut new = Slot::empty(4001);
    new.process(deploy("v2", HealthStatus::Healthy)).unwrap();
    new.process(SlotEvent::Promote).unwrap();

    // grace -> active, active -> deployed
    old.process(SlotEvent::Restore).unwrap();
    new.process(SlotEvent::Retire).unwrap();
    assert_eq!(old.state, SlotState::Active);
    assert!(old.grace_expires_at.is_none());
    assert_eq!(new.state, SlotState::Deployed);
    assert_eq!(new.version.as_deref(), Some("v2"));
}

#[test]
fn test_fsm_redeploy_replaces_version() {
    let mut slot = Slot::empty(4000);
    slot.process(deploy("v1", HealthStatus::Unhealthy)).unwrap();
    slot.process(deploy("v2", HealthStatus::Healthy)).unwrap();
    assert_eq!(slot.state, SlotState::Deployed);
    assert_eq!(slot.version.as_deref(), Some("v2"));
    assert_eq!(slot.health_status, HealthStatus::Healthy);
}

#[test]
fn test_fsm_rejects_invalid_transitions() {
    let cases = [
        (SlotState::Empty, SlotEvent::Promote),
        (SlotState::Active, deploy("v1", HealthStatus::Healthy)),
        (SlotState::Active, SlotEvent::Teardown),
        (SlotState::Active, SlotEvent::Expire),
        (SlotState::Deployed, SlotEvent::Restore),
        (SlotState::Grace, SlotEvent::Promote),
    ];
    for (state, event) in cases {
        assert!(
            matches!(next_state(state, &event), Err(PlaneError::InvalidTransition(_))),
            "{} should reject {:?}",
            state,
            event
        );
    }
}

#[test]
fn test_fsm_failed_transition_leaves_slot_unchanged() {
    let mut slot = Slot::empty(4000);
    slot.process(deploy("v1", HealthStatus::Healthy)).unwrap();
    let before = slot.clone();

    assert_err!(slot.process(SlotEvent::Restore));
    assert_eq!(slot, before);
}

#[test]
fn test_fsm_expire_is_idempotent() {
    let mut slot = Slot::empty(4000);
    slot.process(SlotEvent::Expire).unwrap();
    slot.process(SlotEvent::Expire).unwrap();
    assert_eq!(slot, Slot::empty(4000));
}
