//! The Mailbox / Message entities.

use crate::ids::{EventId, MailboxId, MessageId, SpecialistId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub mailbox_id: MailboxId,
    pub owner_id: SpecialistId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Read,
    Acked,
}

impl MessageStatus {
    /// Status only advances forward: `pending -> read -> acked`.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!((self, next), (Pending, Read) | (Read, Acked) | (Pending, Acked))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub mailbox_id: MailboxId,
    pub sender_id: Option<SpecialistId>,
    pub thread_id: Option<String>,
    pub message_type: String,
    pub content: serde_json::Value,
    pub status: MessageStatus,
    pub priority: MessagePriority,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    pub causation_id: Option<EventId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub mailbox_id: MailboxId,
    pub sender_id: Option<SpecialistId>,
    pub thread_id: Option<String>,
    pub message_type: String,
    pub content: serde_json::Value,
    pub priority: MessagePriority,
}

/// A point-in-time copy of a pending message, embedded in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub mailbox_id: MailboxId,
    pub message_type: String,
    pub content: serde_json::Value,
    pub priority: MessagePriority,
    pub sent_at: DateTime<Utc>,
}
