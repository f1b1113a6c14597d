//! The Specialist entity.

use crate::ids::{SortieId, SpecialistId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistStatus {
    Active,
    Busy,
    Idle,
    Inactive,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specialist {
    pub id: SpecialistId,
    pub name: String,
    pub status: SpecialistStatus,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub current_sortie: Option<SortieId>,
}

impl Specialist {
    /// A specialist is stale when `last_seen` is older than the configured
    /// heartbeat threshold.
    pub fn is_stale(&self, now: DateTime<Utc>, heartbeat_threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) > heartbeat_threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSpecialist {
    pub name: String,
    pub capabilities: Vec<String>,
}
