//! The Event entity.

use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The partition key namespace an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Specialist,
    /// Mailbox/message lifecycle stream.
    Squawk,
    /// File-path lock (CTK) lifecycle stream, keyed by `normalized_path`.
    Ctk,
    Sortie,
    Mission,
    Checkpoint,
    /// Fleet-wide events with no single-entity owner.
    Fleet,
    System,
}

impl StreamType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Specialist => "specialist",
            StreamType::Squawk => "squawk",
            StreamType::Ctk => "ctk",
            StreamType::Sortie => "sortie",
            StreamType::Mission => "mission",
            StreamType::Checkpoint => "checkpoint",
            StreamType::Fleet => "fleet",
            StreamType::System => "system",
        }
    }
}

impl std::str::FromStr for StreamType {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "specialist" => StreamType::Specialist,
            "squawk" => StreamType::Squawk,
            "ctk" => StreamType::Ctk,
            "sortie" => StreamType::Sortie,
            "mission" => StreamType::Mission,
            "checkpoint" => StreamType::Checkpoint,
            "fleet" => StreamType::Fleet,
            "system" => StreamType::System,
            other => {
                return Err(crate::error::CoreError::corruption(format!(
                    "unrecognized stream_type {other:?} stored in event log"
                )))
            }
        })
    }
}

/// A persisted event. Once appended, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    /// Monotonic within `(stream_type, stream_id)`, starting at 1, no gaps.
    pub sequence_number: i64,
    pub event_type: String,
    pub stream_type: StreamType,
    pub stream_id: String,
    pub data: serde_json::Value,
    pub causation_id: Option<EventId>,
    /// Root of the causation chain; equals `event_id` for root events.
    pub correlation_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub schema_version: i32,
}

/// The input to `EventLog::append` — everything the caller supplies, before
/// `sequence_number`, `event_id`, `correlation_id`, and `recorded_at` are
/// assigned by the Event Log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub stream_type: StreamType,
    pub stream_id: String,
    pub data: serde_json::Value,
    pub causation_id: Option<EventId>,
    /// Supplied only when the caller already knows the root; otherwise
    /// derived from `causation_id` or defaulted to the new event's own id.
    pub correlation_id: Option<EventId>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        stream_type: StreamType,
        stream_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            stream_type,
            stream_id: stream_id.into(),
            data,
            causation_id: None,
            correlation_id: None,
            occurred_at: None,
            schema_version: 1,
        }
    }

    pub fn caused_by(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}
