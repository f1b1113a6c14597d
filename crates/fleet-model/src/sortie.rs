//! The Sortie entity.

use crate::ids::{MissionId, SortieId, SpecialistId};
use crate::mission::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortieStatus {
    Pending,
    Assigned,
    InProgress,
    Blocked,
    Review,
    Completed,
    Failed,
    Cancelled,
}

impl SortieStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SortieStatus::Completed | SortieStatus::Failed | SortieStatus::Cancelled
        )
    }

    /// `complete` is only legal from `{in_progress, review}`.
    pub fn can_complete(self) -> bool {
        matches!(self, SortieStatus::InProgress | SortieStatus::Review)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sortie {
    pub id: SortieId,
    pub mission_id: Option<MissionId>,
    pub title: String,
    pub description: Option<String>,
    pub status: SortieStatus,
    pub priority: Priority,
    pub assigned_to: Option<SpecialistId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `0..=100`, non-decreasing within a single `in_progress` run.
    pub progress: i32,
    pub progress_notes: Option<String>,
    pub blocked_by: Option<String>,
    pub blocked_reason: Option<String>,
    pub files: Vec<String>,
    pub result: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSortie {
    pub mission_id: Option<MissionId>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub files: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Validate a progress value: `0` and `100` are accepted, anything outside
/// `0..=100` is rejected with `VALIDATION`.
pub fn validate_progress(value: i32) -> Result<(), crate::error::CoreError> {
    if (0..=100).contains(&value) {
        Ok(())
    } else {
        Err(crate::error::CoreError::validation(format!(
            "progress must be in 0..=100, got {value}"
        )))
    }
}
