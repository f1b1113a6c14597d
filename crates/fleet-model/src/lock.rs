//! The Lock (file reservation, "CTK") entity.

use crate::ids::{LockId, SpecialistId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPurpose {
    Edit,
    Read,
    Delete,
}

impl LockPurpose {
    /// Exclusive semantics always for `edit`/`delete`; multiple `read`s on
    /// the same path coexist; `edit` vs `read` is rejected.
    pub fn conflicts_with(self, other: LockPurpose) -> bool {
        !matches!((self, other), (LockPurpose::Read, LockPurpose::Read))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Released,
    Expired,
    ForceReleased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub file: String,
    pub normalized_path: String,
    pub reserved_by: SpecialistId,
    pub reserved_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub purpose: LockPurpose,
    pub checksum: Option<String>,
    pub status: LockStatus,
}

impl Lock {
    /// Expiry is the inclusive boundary: a lock expiring exactly at `now` is
    /// expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Active && !self.is_expired_at(now)
    }
}

/// Case-folding policy for `normalized_path`, chosen once at startup and
/// recorded in a reserved metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePolicy {
    Sensitive,
    InsensitiveAscii,
}

impl CasePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CasePolicy::Sensitive => "sensitive",
            CasePolicy::InsensitiveAscii => "insensitive_ascii",
        }
    }
}

impl std::str::FromStr for CasePolicy {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensitive" => Ok(CasePolicy::Sensitive),
            "insensitive_ascii" => Ok(CasePolicy::InsensitiveAscii),
            other => Err(crate::error::CoreError::corruption(format!(
                "unrecognized case_policy {other:?} in core_metadata"
            ))),
        }
    }
}

/// A point-in-time copy of a lock, embedded in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub id: LockId,
    pub file: String,
    pub normalized_path: String,
    pub reserved_by: SpecialistId,
    pub purpose: LockPurpose,
    pub checksum: Option<String>,
    pub expires_at: DateTime<Utc>,
}
