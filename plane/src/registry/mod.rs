//! Slot registry
//!
//! The registry is the single source of truth for slot state. Writes are
//! optimistic: a document is stored only if the caller read the version that
//! is currently stored, and each accepted write bumps the version by one.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deploy::fsm::SlotEvent;
use crate::errors::PlaneError;
use crate::models::slot::{HealthStatus, ProjectSlots, SlotName, SlotState};

/// Durable store of slot pairs keyed by (project, environment)
#[async_trait]
pub trait SlotRegistry: Send + Sync {
    /// Read one pair
    async fn get(&self, project: &str, environment: &str)
        -> Result<Option<ProjectSlots>, PlaneError>;

    /// Store `slots` if its `version` matches the stored version (0 for a new
    /// pair). Returns the stored document with the bumped version.
    async fn upsert(&self, slots: ProjectSlots) -> Result<ProjectSlots, PlaneError>;

    /// Narrow single-slot state update used by health and cleanup paths
    async fn update_slot_state(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        state: SlotState,
    ) -> Result<ProjectSlots, PlaneError>;

    /// Narrow single-slot health update
    async fn update_slot_health(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        health: HealthStatus,
    ) -> Result<ProjectSlots, PlaneError>;

    /// Every stored pair
    async fn list_all(&self) -> Result<Vec<ProjectSlots>, PlaneError>;

    /// Pairs owned by one team
    async fn list_by_team(&self, team_id: &str) -> Result<Vec<ProjectSlots>, PlaneError> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|s| s.team_id == team_id).collect())
    }
}

/// Version check and invariant check shared by the registry backends
pub(crate) fn apply_upsert(
    current: Option<&ProjectSlots>,
    mut incoming: ProjectSlots,
    now: DateTime<Utc>,
) -> Result<ProjectSlots, PlaneError> {
    let stored_version = current.map(|c| c.version).unwrap_or(0);
    if incoming.version != stored_version {
        return Err(PlaneError::SlotConflict {
            project: incoming.project_name.clone(),
            environment: incoming.environment.clone(),
        });
    }

    incoming
        .check_invariants()
        .map_err(PlaneError::InvalidTransition)?;

    if let Some(current) = current {
        if current.blue.port != incoming.blue.port || current.green.port != incoming.green.port {
            return Err(PlaneError::InvalidTransition(format!(
                "slot ports of {} are fixed",
                current.key()
            )));
        }
    }

    incoming.version = stored_version + 1;
    incoming.last_updated = now;
    Ok(incoming)
}

/// Single-slot state change shared by the registry backends.
///
/// Only `empty` and `deployed` can be set this way; `active` and `grace`
/// always involve both slots and need a full `upsert`.
pub(crate) fn apply_state_update(
    mut current: ProjectSlots,
    slot: SlotName,
    state: SlotState,
    now: DateTime<Utc>,
) -> Result<ProjectSlots, PlaneError> {
    let target = current.slot_mut(slot);
    match (target.state, state) {
        (from, to) if from == to && to != SlotState::Grace && to != SlotState::Active => {}
        (_, SlotState::Empty) => target.process(SlotEvent::Teardown)?,
        (SlotState::Grace, SlotState::Deployed) => {
            target.state = SlotState::Deployed;
            target.grace_expires_at = None;
        }
        (from, to) => {
            return Err(PlaneError::InvalidTransition(format!(
                "cannot set {} slot from {} to {} without a full write",
                slot, from, to
            )));
        }
    }

    current
        .check_invariants()
        .map_err(PlaneError::InvalidTransition)?;
    current.version += 1;
    current.last_updated = now;
    Ok(current)
}

/// Single-slot health change shared by the registry backends
pub(crate) fn apply_health_update(
    mut current: ProjectSlots,
    slot: SlotName,
    health: HealthStatus,
    now: DateTime<Utc>,
) -> ProjectSlots {
    current.slot_mut(slot).health_status = health;
    current.version += 1;
    current.last_updated = now;
    current
}

pub(crate) fn not_found(project: &str, environment: &str) -> PlaneError {
    PlaneError::NotFound(format!("no slots for {}/{}", project, environment))
}
