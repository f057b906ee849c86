//! Slot models
//!
//! A `ProjectSlots` document is the unit of persistence: both slots of one
//! project environment are always read and written together.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two slots of a project environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotName {
    Blue,
    Green,
}

impl SlotName {
    /// The opposite slot
    pub fn other(self) -> SlotName {
        match self {
            SlotName::Blue => SlotName::Green,
            SlotName::Green => SlotName::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotName::Blue => "blue",
            SlotName::Green => "green",
        }
    }

    pub const ALL: [SlotName; 2] = [SlotName::Blue, SlotName::Green];
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// No container
    Empty,

    /// Container running, not receiving live traffic
    Deployed,

    /// Receiving live traffic
    Active,

    /// Previously active, kept running for rollback until the window ends
    Grace,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Empty => "empty",
            SlotState::Deployed => "deployed",
            SlotState::Active => "active",
            SlotState::Grace => "grace",
        };
        f.write_str(s)
    }
}

/// Last known health of a slot's container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// A single execution slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub state: SlotState,

    /// Host port, fixed for the lifetime of the pair
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,

    /// Credential id of the deployer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_by: Option<String>,

    #[serde(default)]
    pub health_status: HealthStatus,

    /// Only set while `state == grace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    /// A fresh empty slot on `port`
    pub fn empty(port: u16) -> Self {
        Self {
            state: SlotState::Empty,
            port,
            version: None,
            image: None,
            deployed_at: None,
            deployed_by: None,
            health_status: HealthStatus::Unknown,
            grace_expires_at: None,
        }
    }

    /// Reset to empty, keeping the port
    pub fn clear(&mut self) {
        *self = Slot::empty(self.port);
    }

    pub fn is_empty(&self) -> bool {
        self.state == SlotState::Empty
    }
}

/// Both slots of one project environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSlots {
    pub project_name: String,
    pub environment: String,

    /// Owning team
    pub team_id: String,

    /// Host the containers run on
    pub host: String,

    /// Slot currently receiving live traffic, if any
    pub active_slot: Option<SlotName>,

    pub blue: Slot,
    pub green: Slot,

    pub last_updated: DateTime<Utc>,

    /// Optimistic concurrency version, 0 until first stored
    pub version: u64,
}

impl ProjectSlots {
    /// A fresh pair: both slots empty, nothing active
    pub fn new(
        project_name: &str,
        environment: &str,
        team_id: &str,
        host: &str,
        blue_port: u16,
        green_port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            project_name: project_name.to_string(),
            environment: environment.to_string(),
            team_id: team_id.to_string(),
            host: host.to_string(),
            active_slot: None,
            blue: Slot::empty(blue_port),
            green: Slot::empty(green_port),
            last_updated: now,
            version: 0,
        }
    }

    pub fn slot(&self, name: SlotName) -> &Slot {
        match name {
            SlotName::Blue => &self.blue,
            SlotName::Green => &self.green,
        }
    }

    pub fn slot_mut(&mut self, name: SlotName) -> &mut Slot {
        match name {
            SlotName::Blue => &mut self.blue,
            SlotName::Green => &mut self.green,
        }
    }

    /// The slot that is not live. `None` on a fresh pair, where both are.
    pub fn inactive_slot(&self) -> Option<SlotName> {
        self.active_slot.map(SlotName::other)
    }

    /// The slot currently in grace, if any
    pub fn grace_slot(&self) -> Option<SlotName> {
        SlotName::ALL
            .into_iter()
            .find(|name| self.slot(*name).state == SlotState::Grace)
    }

    /// Registry key for this pair
    pub fn key(&self) -> String {
        format!("{}/{}", self.project_name, self.environment)
    }

    /// Container name of a slot on the host
    pub fn container_name(&self, slot: SlotName) -> String {
        format!("{}-{}-{}", self.project_name, self.environment, slot)
    }

    /// Check the pair-level invariants:
    /// at most one slot active, `active_slot` naming exactly that slot, and
    /// `grace_expires_at` present iff the slot is in grace.
    pub fn check_invariants(&self) -> Result<(), String> {
        let active: Vec<SlotName> = SlotName::ALL
            .into_iter()
            .filter(|name| self.slot(*name).state == SlotState::Active)
            .collect();

        match (active.as_slice(), self.active_slot) {
            ([], None) => {}
            ([only], Some(named)) if *only == named => {}
            ([_, _], _) => return Err("both slots are active".to_string()),
            (found, named) => {
                return Err(format!(
                    "activeSlot {:?} does not match active slots {:?}",
                    named, found
                ))
            }
        }

        for name in SlotName::ALL {
            let slot = self.slot(name);
            let in_grace = slot.state == SlotState::Grace;
            if in_grace != slot.grace_expires_at.is_some() {
                return Err(format!(
                    "{} slot is {} but graceExpiresAt is {:?}",
                    name, slot.state, slot.grace_expires_at
                ));
            }
        }

        if self.blue.port == self.green.port {
            return Err("blue and green share a port".to_string());
        }

        Ok(())
    }
}
