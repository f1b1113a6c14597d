//! The Cursor entity — a consumer's read position within a stream.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub id: String,
    pub stream_type: String,
    pub stream_id: String,
    pub position: i64,
    pub consumer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cursor {
    /// `advance(id, p)` requires `p >= position` — monotonic,
    /// never regresses.
    pub fn validate_advance(&self, new_position: i64) -> Result<(), CoreError> {
        if new_position >= self.position {
            Ok(())
        } else {
            Err(CoreError::stale(format!(
                "cursor {} cannot advance backward from {} to {}",
                self.id, self.position, new_position
            )))
        }
    }
}
