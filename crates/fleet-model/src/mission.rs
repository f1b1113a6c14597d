//! The Mission entity.

use crate::ids::MissionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    InProgress,
    Review,
    Completed,
    Cancelled,
}

impl MissionStatus {
    /// Whether `complete`/`cancel` may legally follow this status:
    /// `pending -> in_progress -> (review?) -> completed|cancelled`.
    pub fn can_transition_to(self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Review)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Review, Completed)
                | (Review, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub title: String,
    pub description: Option<String>,
    pub status: MissionStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_sorties: i64,
    pub completed_sorties: i64,
    pub result: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMission {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub metadata: serde_json::Value,
}
