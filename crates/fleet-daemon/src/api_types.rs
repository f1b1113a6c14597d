//! Request and response bodies for the Coordinator API.
//!
//! No business logic lives here; these types are only `Serialize` /
//! `Deserialize` shapes Axum decodes/encodes at the HTTP boundary.

use fleet_model::{CheckpointTrigger, LockPurpose, MessagePriority, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_metadata() -> Value {
    serde_json::json!({})
}

// ---------------------------------------------------------------------------
// Missions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateMissionRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CompleteMissionRequest {
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListMissionsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Sorties
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSortieRequest {
    #[serde(default)]
    pub mission_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
pub struct AssignSortieRequest {
    pub specialist_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSortieRequest {
    pub specialist_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CompleteSortieRequest {
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SortieProgressRequest {
    pub progress: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SortieBlockRequest {
    pub blocked_by: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListSortiesQuery {
    pub mission_id: Option<String>,
    pub specialist_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Specialists
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterSpecialistRequest {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpecialistStatusRequest {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    pub file: String,
    pub specialist_id: String,
    pub timeout_ms: i64,
    pub purpose: LockPurpose,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockRequest {
    pub specialist_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ForceReleaseLockRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendLockRequest {
    pub specialist_id: String,
    pub additional_ms: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListLocksQuery {
    pub active: Option<String>,
    pub file: Option<String>,
    pub specialist_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Mailbox / messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub mailbox_owner_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub message_type: String,
    pub content: Value,
    #[serde(default = "default_priority")]
    pub priority: MessagePriority,
}

fn default_priority() -> MessagePriority {
    MessagePriority::Normal
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListMessagesQuery {
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListEventsQuery {
    pub stream_type: Option<String>,
    pub stream_id: Option<String>,
    pub after_sequence: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AppendEventRequest {
    pub event_type: String,
    pub stream_type: String,
    pub stream_id: String,
    pub data: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCheckpointRequest {
    pub trigger: CheckpointTrigger,
    pub created_by: String,
    #[serde(default)]
    pub progress_percent: Option<i32>,
    #[serde(default)]
    pub trigger_details: Option<Value>,
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RestoreCheckpointQuery {
    pub dry_run: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PruneCheckpointsQuery {
    pub older_than_days: Option<i64>,
    pub keep_per_mission: Option<i64>,
    pub include_completed: Option<bool>,
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdvanceCursorRequest {
    pub id: String,
    pub target_stream_type: String,
    pub target_stream_id: String,
    pub position: i64,
    #[serde(default)]
    pub consumer_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StaleMissionsQuery {
    pub activity_threshold_secs: Option<i64>,
}

// ---------------------------------------------------------------------------
// Health / stats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub wal_size_bytes: u64,
    pub latency_ms: u128,
}

#[derive(Debug, Serialize, Default)]
pub struct StatsResponse {
    pub missions_total: i64,
    pub missions_in_progress: i64,
    pub sorties_total: i64,
    pub active_locks: i64,
    pub events_total: i64,
    pub specialists_total: i64,
}
