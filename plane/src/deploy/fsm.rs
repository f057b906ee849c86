//! Slot state machine
//!
//! ```text
//! empty    --Deploy-->   deployed
//! deployed --Deploy-->   deployed   (replace before promotion)
//! grace    --Deploy-->   deployed   (a new deploy retires the grace slot)
//! deployed --Promote-->  active
//! active   --Demote-->   grace
//! grace    --Restore-->  active
//! active   --Retire-->   deployed
//! grace    --Expire-->   empty
//! empty    --Expire-->   empty      (cleanup is idempotent)
//! *        --Teardown--> empty      (any slot that is not live)
//! ```

use chrono::{DateTime, Utc};

use crate::errors::PlaneError;
use crate::models::slot::{HealthStatus, Slot, SlotState};

/// Slot event
#[derive(Debug, Clone)]
pub enum SlotEvent {
    /// A new container was started in the slot
    Deploy {
        version: Option<String>,
        image: String,
        deployed_by: String,
        deployed_at: DateTime<Utc>,
        health: HealthStatus,
    },

    /// The slot starts receiving live traffic
    Promote,

    /// Live traffic moved to the other slot; keep running until `expires_at`
    Demote { expires_at: DateTime<Utc> },

    /// Rollback made this grace slot live again
    Restore,

    /// Rollback moved live traffic away from this slot
    Retire,

    /// The grace window ended and the container was removed
    Expire,

    /// The container was removed outside the normal lifecycle
    Teardown,
}

impl SlotEvent {
    fn name(&self) -> &'static str {
        match self {
            SlotEvent::Deploy { .. } => "deploy",
            SlotEvent::Promote => "promote",
            SlotEvent::Demote { .. } => "demote",
            SlotEvent::Restore => "restore",
            SlotEvent::Retire => "retire",
            SlotEvent::Expire => "expire",
            SlotEvent::Teardown => "teardown",
        }
    }
}

/// Compute the next state without touching the slot
pub fn next_state(state: SlotState, event: &SlotEvent) -> Result<SlotState, PlaneError> {
    let next = match (state, event) {
        (SlotState::Empty | SlotState::Deployed | SlotState::Grace, SlotEvent::Deploy { .. }) => {
            SlotState::Deployed
        }
        (SlotState::Deployed, SlotEvent::Promote) => SlotState::Active,
        (SlotState::Active, SlotEvent::Demote { .. }) => SlotState::Grace,
        (SlotState::Grace, SlotEvent::Restore) => SlotState::Active,
        (SlotState::Active, SlotEvent::Retire) => SlotState::Deployed,
        (SlotState::Grace | SlotState::Empty, SlotEvent::Expire) => SlotState::Empty,
        (SlotState::Empty | SlotState::Deployed | SlotState::Grace, SlotEvent::Teardown) => {
            SlotState::Empty
        }
        (state, event) => {
            return Err(PlaneError::InvalidTransition(format!(
                "cannot {} a slot in state {}",
                event.name(),
                state
            )));
        }
    };
    Ok(next)
}

impl Slot {
    /// Apply an event, updating the state and the fields that go with it
    pub fn process(&mut self, event: SlotEvent) -> Result<(), PlaneError> {
        let next = next_state(self.state, &event)?;

        match event {
            SlotEvent::Deploy {
                version,
                image,
                deployed_by,
                deployed_at,
                health,
            } => {
                self.version = version;
                self.image = Some(image);
                self.deployed_by = Some(deployed_by);
                self.deployed_at = Some(deployed_at);
                self.health_status = health;
                self.grace_expires_at = None;
            }
            SlotEvent::Demote { expires_at } => {
                self.grace_expires_at = Some(expires_at);
            }
            SlotEvent::Restore | SlotEvent::Retire => {
                self.grace_expires_at = None;
            }
            SlotEvent::Expire | SlotEvent::Teardown => {
                self.clear();
            }
            SlotEvent::Promote => {}
        }

        self.state = next;
        Ok(())
    }
}
