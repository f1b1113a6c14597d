//! The Checkpoint entity.

use crate::ids::{CheckpointId, MissionId, SortieId, SpecialistId};
use crate::lock::LockSnapshot;
use crate::mailbox::MessageSnapshot;
use crate::sortie::{SortieStatus};
use crate::mission::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Progress,
    Error,
    Manual,
    Compaction,
}

impl CheckpointTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointTrigger::Progress => "progress",
            CheckpointTrigger::Error => "error",
            CheckpointTrigger::Manual => "manual",
            CheckpointTrigger::Compaction => "compaction",
        }
    }
}

/// A full-state copy of a sortie as of checkpoint time, including progress
/// and the files it touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortieSnapshot {
    pub id: SortieId,
    pub title: String,
    pub status: SortieStatus,
    pub priority: Priority,
    pub assigned_to: Option<SpecialistId>,
    pub progress: i32,
    pub files: Vec<String>,
    pub blocked_by: Option<String>,
    pub blocked_reason: Option<String>,
}

/// Derived from the latest events for a mission at checkpoint time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub last_action: Option<String>,
    pub next_steps: Vec<String>,
    pub blockers: Vec<String>,
    pub files_modified: Vec<String>,
    pub mission_summary: Option<String>,
    pub elapsed_time_ms: i64,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub mission_id: MissionId,
    pub timestamp: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub progress_percent: i32,
    /// Ordered by sortie id.
    pub sorties: Vec<SortieSnapshot>,
    /// Ordered by `normalized_path`.
    pub active_locks: Vec<LockSnapshot>,
    /// Ordered by `sent_at`.
    pub pending_messages: Vec<MessageSnapshot>,
    pub recovery_context: RecoveryContext,
    pub created_by: SpecialistId,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCheckpoint {
    pub mission_id: MissionId,
    pub trigger: CheckpointTrigger,
    pub trigger_details: Option<serde_json::Value>,
    pub created_by: SpecialistId,
    pub progress_percent: Option<i32>,
    pub ttl_hours: Option<i64>,
}
