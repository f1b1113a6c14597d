//! The Lock Manager — file-path reservations ("CTK") with TTL,
//! ownership, conflict detection, and an expiry sweeper.
//!
//! `Acquire` always decides first (conflict or insert) and persists the
//! decision second. The Lock Manager is a projection plus an expiry
//! sweeper: every mutation is an appended `ctk`-stream event applied by
//! `fleet-projections`, never a direct `UPDATE locks`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use fleet_model::{CoreError, CoreResult, Lock, LockId, LockPurpose, LockSnapshot, NewEvent, SpecialistId, StreamType};
use fleet_projections::{queries, Ledger};
use serde_json::json;
use tracing::{info, warn};

/// The outcome of [`LockManager::acquire`].
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(Lock),
    Conflict { existing_lock: Lock },
}

/// The outcome of one snapshot in [`LockManager::reacquire`].
#[derive(Debug, Clone)]
pub enum ReacquireOutcome {
    Reacquired(Lock),
    Conflict { existing_lock: Lock },
}

#[derive(Clone)]
pub struct LockManager {
    ledger: Ledger,
    case_policy: fleet_model::CasePolicy,
}

impl LockManager {
    pub fn new(ledger: Ledger, case_policy: fleet_model::CasePolicy) -> Self {
        Self { ledger, case_policy }
    }

    /// Transaction-scoped variant of [`acquire`], used directly by `acquire`
    /// and composed by `fleet-recovery::restore` so reacquiring the
    /// checkpoint's locks shares its overarching write transaction. Decides
    /// the conflict-or-insert outcome but never commits or rolls back —
    /// that's the caller's job.
    pub async fn acquire_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        file: &str,
        specialist_id: &SpecialistId,
        timeout_ms: i64,
        purpose: LockPurpose,
        checksum: Option<String>,
    ) -> CoreResult<AcquireOutcome> {
        if timeout_ms <= 0 {
            return Err(CoreError::validation("timeout_ms must be positive"));
        }
        let normalized_path = normalize_path(file, self.case_policy)?;
        let now = Utc::now();

        if let Some(existing) = queries::get_active_lock_by_path_in_tx(tx, &normalized_path, now).await? {
            if existing.purpose.conflicts_with(purpose) {
                return Ok(AcquireOutcome::Conflict { existing_lock: existing });
            }
        }

        // Opportunistic reclaim: a row can still be `status='active'` with
        // `expires_at <= now` if the sweeper hasn't ticked yet; the query
        // above already excludes it from the conflict check, but the stale
        // row itself still needs an `expired` event so it stops shadowing
        // future lookups.
        self.reclaim_if_stale(tx, &normalized_path, now).await?;

        let lock_id = LockId::generate();
        let expires_at = now + Duration::milliseconds(timeout_ms);

        self.ledger
            .append_in_tx(
                tx,
                NewEvent::new(
                    "lock_acquired",
                    StreamType::Ctk,
                    normalized_path.clone(),
                    json!({
                        "lock_id": lock_id.as_str(),
                        "file": file,
                        "reserved_by": specialist_id.as_str(),
                        "purpose": purpose_str(purpose),
                        "checksum": checksum.clone(),
                        "expires_at": expires_at.to_rfc3339(),
                    }),
                ),
            )
            .await?;

        Ok(AcquireOutcome::Acquired(Lock {
            id: lock_id.clone(),
            file: file.to_string(),
            normalized_path: normalized_path.clone(),
            reserved_by: specialist_id.clone(),
            reserved_at: now,
            released_at: None,
            expires_at,
            purpose,
            checksum: checksum.clone(),
            status: fleet_model::LockStatus::Active,
        }))
    }

    /// `Acquire(file, specialist_id, timeout_ms, purpose, checksum?)` (spec
    /// §4.4). Normalizes `file`, then atomically — inside one write
    /// transaction — checks for a conflicting active lock and either
    /// reports the conflict or inserts the new one. A conflicting lock past
    /// its `expires_at` is reclaimed opportunistically before the check.
    pub async fn acquire(
        &self,
        file: &str,
        specialist_id: &SpecialistId,
        timeout_ms: i64,
        purpose: LockPurpose,
        checksum: Option<String>,
    ) -> CoreResult<AcquireOutcome> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let outcome = self
                .acquire_in_tx(&mut write.tx, file, specialist_id, timeout_ms, purpose, checksum.clone())
                .await?;
            match &outcome {
                AcquireOutcome::Conflict { .. } => write.rollback().await?,
                AcquireOutcome::Acquired(_) => {
                    write.commit().await?;
                    self.ledger.store().note_write_committed();
                }
            }
            Ok(outcome)
        })
        .await
    }

    /// `Release(lock_id, specialist_id)`: `OWNERSHIP_ERROR` if
    /// the caller isn't the holder; `NOT_FOUND` if already inactive —
    /// never a double release.
    pub async fn release(&self, lock_id: &LockId, specialist_id: &SpecialistId) -> CoreResult<Lock> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let existing = queries::get_lock_in_tx(&mut write.tx, lock_id)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("lock {lock_id} not found")))?;

            if &existing.reserved_by != specialist_id {
                write.rollback().await?;
                return Err(CoreError::ownership_error(format!(
                    "lock {lock_id} is held by {}, not {specialist_id}",
                    existing.reserved_by
                )));
            }
            if existing.status != fleet_model::LockStatus::Active {
                write.rollback().await?;
                return Err(CoreError::not_found(format!("lock {lock_id} is not active")));
            }

            let now = Utc::now();
            self.ledger
                .append_in_tx(
                    &mut write.tx,
                    NewEvent::new(
                        "lock_released",
                        StreamType::Ctk,
                        existing.normalized_path.clone(),
                        json!({"lock_id": lock_id.as_str()}),
                    ),
                )
                .await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(Lock {
                status: fleet_model::LockStatus::Released,
                released_at: Some(now),
                ..existing
            })
        })
        .await
    }

    /// Transaction-scoped variant of [`force_release`], used by
    /// `fleet-recovery::restore` to clear locks outside the checkpoint
    /// within its overarching write transaction.
    pub async fn force_release_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        lock_id: &LockId,
        reason: &str,
    ) -> CoreResult<Lock> {
        let existing = queries::get_lock_in_tx(tx, lock_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("lock {lock_id} not found")))?;

        let now = Utc::now();
        self.ledger
            .append_in_tx(
                tx,
                NewEvent::new(
                    "lock_force_released",
                    StreamType::Ctk,
                    existing.normalized_path.clone(),
                    json!({"lock_id": lock_id.as_str(), "reason": reason}),
                ),
            )
            .await?;

        Ok(Lock {
            status: fleet_model::LockStatus::ForceReleased,
            released_at: Some(now),
            ..existing
        })
    }

    /// `ForceRelease(lock_id, reason)`: administrative, no
    /// ownership check.
    pub async fn force_release(&self, lock_id: &LockId, reason: &str) -> CoreResult<Lock> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let lock = self.force_release_in_tx(&mut write.tx, lock_id, reason).await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();
            Ok(lock)
        })
        .await
    }

    /// `Extend(lock_id, additional_ms)`: only by the owner,
    /// only while still active and unexpired.
    pub async fn extend(&self, lock_id: &LockId, specialist_id: &SpecialistId, additional_ms: i64) -> CoreResult<Lock> {
        if additional_ms <= 0 {
            return Err(CoreError::validation("additional_ms must be positive"));
        }
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let existing = queries::get_lock_in_tx(&mut write.tx, lock_id)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("lock {lock_id} not found")))?;

            if &existing.reserved_by != specialist_id {
                write.rollback().await?;
                return Err(CoreError::ownership_error(format!(
                    "lock {lock_id} is held by {}, not {specialist_id}",
                    existing.reserved_by
                )));
            }
            let now = Utc::now();
            if existing.status != fleet_model::LockStatus::Active || existing.is_expired_at(now) {
                write.rollback().await?;
                return Err(CoreError::stale(format!("lock {lock_id} is no longer active")));
            }

            let new_expires_at = existing.expires_at + Duration::milliseconds(additional_ms);
            self.ledger
                .append_in_tx(
                    &mut write.tx,
                    NewEvent::new(
                        "lock_extended",
                        StreamType::Ctk,
                        existing.normalized_path.clone(),
                        json!({"lock_id": lock_id.as_str(), "expires_at": new_expires_at.to_rfc3339()}),
                    ),
                )
                .await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(Lock {
                expires_at: new_expires_at,
                ..existing
            })
        })
        .await
    }

    pub async fn get_active(&self) -> CoreResult<Vec<Lock>> {
        queries::list_active_locks(self.ledger.store().pool()).await
    }

    pub async fn get_by_file(&self, file: &str) -> CoreResult<Vec<Lock>> {
        let normalized_path = normalize_path(file, self.case_policy)?;
        queries::list_locks_by_file(self.ledger.store().pool(), &normalized_path).await
    }

    pub async fn get_by_specialist(&self, specialist_id: &SpecialistId) -> CoreResult<Vec<Lock>> {
        queries::list_locks_by_specialist(self.ledger.store().pool(), specialist_id).await
    }

    pub async fn get_expired(&self) -> CoreResult<Vec<Lock>> {
        queries::list_expired_locks(self.ledger.store().pool(), Utc::now()).await
    }

    pub async fn is_locked(&self, file: &str) -> CoreResult<bool> {
        let normalized_path = normalize_path(file, self.case_policy)?;
        let active = queries::get_active_lock_by_path(self.ledger.store().pool(), &normalized_path, Utc::now()).await?;
        Ok(active.is_some())
    }

    /// `ReleaseExpired()`: the sweeper. Runs on a fixed tick
    /// and opportunistically inside `Acquire`. Returns the number of locks
    /// reclaimed.
    pub async fn release_expired(&self) -> CoreResult<i64> {
        let now = Utc::now();
        let expired = queries::list_expired_locks(self.ledger.store().pool(), now).await?;
        let mut reclaimed = 0i64;
        for lock in expired {
            let did_reclaim = fleet_store::retry_transient(|| async {
                let mut write = self.ledger.store().begin_write().await?;
                // Re-check inside the write transaction: another writer may
                // have already released/extended it since the read above.
                let Some(current) = queries::get_lock_in_tx(&mut write.tx, &lock.id).await? else {
                    write.rollback().await?;
                    return Ok(false);
                };
                if current.status != fleet_model::LockStatus::Active || !current.is_expired_at(now) {
                    write.rollback().await?;
                    return Ok(false);
                }
                self.ledger
                    .append_in_tx(
                        &mut write.tx,
                        NewEvent::new(
                            "lock_expired",
                            StreamType::Ctk,
                            current.normalized_path.clone(),
                            json!({"lock_id": current.id.as_str()}),
                        ),
                    )
                    .await?;
                write.commit().await?;
                self.ledger.store().note_write_committed();
                Ok(true)
            })
            .await?;
            if did_reclaim {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!(reclaimed, "lock sweeper reclaimed expired locks");
        }
        Ok(reclaimed)
    }

    /// Transaction-scoped variant of [`reacquire`], used by
    /// `fleet-recovery::restore` so every snapshot in the checkpoint is
    /// reacquired within its single overarching write transaction —
    /// all-or-nothing alongside the sortie/message restores around it.
    pub async fn reacquire_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        snapshots: &[LockSnapshot],
    ) -> CoreResult<Vec<ReacquireOutcome>> {
        let mut results = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let ttl_ms = (snapshot.expires_at - Utc::now()).num_milliseconds().max(1000);
            match self
                .acquire_in_tx(tx, &snapshot.file, &snapshot.reserved_by, ttl_ms, snapshot.purpose, snapshot.checksum.clone())
                .await?
            {
                AcquireOutcome::Acquired(lock) => results.push(ReacquireOutcome::Reacquired(lock)),
                AcquireOutcome::Conflict { existing_lock } => {
                    warn!(path = %snapshot.normalized_path, "reacquire conflict, leaving foreign lock in place");
                    results.push(ReacquireOutcome::Conflict { existing_lock })
                }
            }
        }
        Ok(results)
    }

    /// `Reacquire(snapshots)`, used only by Recovery:
    /// attempts `Acquire` for each snapshot under its original owner and
    /// purpose. A snapshot's `checksum` is carried through unverified —
    /// this Core does not read file contents to compare checksums; a
    /// conflict is reported exactly when a foreign active lock already
    /// holds the path.
    pub async fn reacquire(&self, snapshots: &[LockSnapshot]) -> CoreResult<Vec<ReacquireOutcome>> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let results = self.reacquire_in_tx(&mut write.tx, snapshots).await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();
            Ok(results)
        })
        .await
    }

    /// Spawn the periodic sweeper task.
    pub fn spawn_sweeper(manager: Arc<LockManager>, interval: StdDuration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.release_expired().await {
                    warn!(error = %e, "lock sweeper tick failed");
                }
            }
        });
    }

    /// Opportunistic half of `ReleaseExpired`: if an active row
    /// at `normalized_path` is already past `expires_at`, reclaim it by
    /// appending the same `lock_expired` event [`LockManager::release_expired`]
    /// uses — never a direct `UPDATE locks`, so a projection rebuild from
    /// the event log reproduces this reclaim exactly.
    async fn reclaim_if_stale(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        normalized_path: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT id, normalized_path FROM locks WHERE normalized_path = ? AND status = 'active' AND expires_at <= ?",
        )
        .bind(normalized_path)
        .bind(now.to_rfc3339())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("reclaim scan: {e}")))?;

        if let Some((id, path)) = row {
            self.ledger
                .append_in_tx(tx, NewEvent::new("lock_expired", StreamType::Ctk, path, json!({"lock_id": id})))
                .await?;
        }
        Ok(())
    }
}

fn purpose_str(purpose: LockPurpose) -> &'static str {
    match purpose {
        LockPurpose::Edit => "edit",
        LockPurpose::Read => "read",
        LockPurpose::Delete => "delete",
    }
}

/// Resolve `raw` to an absolute, symlink-resolved path, applying the
/// configured case-fold policy. Walks up to the nearest existing ancestor
/// and canonicalizes that. Failure to resolve any ancestor (e.g. a path
/// with no root) is `PATH_INVALID`, surfaced as `VALIDATION`.
pub fn normalize_path(raw: &str, case_policy: fleet_model::CasePolicy) -> CoreResult<String> {
    let mut current = PathBuf::from(raw);
    let mut trailing: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&current) {
            Ok(mut resolved) => {
                for component in trailing.iter().rev() {
                    resolved.push(component);
                }
                let mut normalized = resolved.to_string_lossy().into_owned();
                if case_policy == fleet_model::CasePolicy::InsensitiveAscii {
                    normalized = normalized.to_ascii_lowercase();
                }
                return Ok(normalized);
            }
            Err(_) => {
                let Some(file_name) = current.file_name().map(|n| n.to_owned()) else {
                    return Err(CoreError::validation(format!("cannot normalize path {raw:?}")));
                };
                trailing.push(file_name);
                if !current.pop() {
                    return Err(CoreError::validation(format!("cannot normalize path {raw:?}")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::CasePolicy;
    use std::sync::Arc as StdArc;

    async fn fresh_manager() -> (tempfile::TempDir, LockManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = fleet_store::Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
            .await
            .unwrap();
        let ledger = Ledger::new(StdArc::new(store));
        (dir, LockManager::new(ledger, CasePolicy::Sensitive))
    }

    #[tokio::test]
    async fn acquire_then_conflicting_acquire_reports_existing_lock() {
        let (dir, manager) = fresh_manager().await;
        let file = dir.path().join("a.ts");
        std::fs::write(&file, b"hello").unwrap();
        let file = file.to_str().unwrap();

        let spc1 = SpecialistId::generate();
        let spc2 = SpecialistId::generate();

        let first = manager.acquire(file, &spc1, 60_000, LockPurpose::Edit, None).await.unwrap();
        let AcquireOutcome::Acquired(lock1) = first else { panic!("expected acquired") };

        let second = manager.acquire(file, &spc2, 60_000, LockPurpose::Edit, None).await.unwrap();
        match second {
            AcquireOutcome::Conflict { existing_lock } => assert_eq!(existing_lock.id, lock1.id),
            AcquireOutcome::Acquired(_) => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn release_by_non_owner_is_ownership_error() {
        let (dir, manager) = fresh_manager().await;
        let file = dir.path().join("b.ts");
        std::fs::write(&file, b"hello").unwrap();
        let file = file.to_str().unwrap();

        let owner = SpecialistId::generate();
        let stranger = SpecialistId::generate();

        let AcquireOutcome::Acquired(lock) = manager.acquire(file, &owner, 60_000, LockPurpose::Edit, None).await.unwrap() else {
            panic!("expected acquired")
        };

        let err = manager.release(&lock.id, &stranger).await.unwrap_err();
        assert_eq!(err.kind, fleet_model::ErrorKind::OwnershipError);
    }

    #[tokio::test]
    async fn double_release_never_succeeds_twice() {
        let (dir, manager) = fresh_manager().await;
        let file = dir.path().join("c.ts");
        std::fs::write(&file, b"hello").unwrap();
        let file = file.to_str().unwrap();

        let owner = SpecialistId::generate();
        let AcquireOutcome::Acquired(lock) = manager.acquire(file, &owner, 60_000, LockPurpose::Edit, None).await.unwrap() else {
            panic!("expected acquired")
        };

        manager.release(&lock.id, &owner).await.unwrap();
        let err = manager.release(&lock.id, &owner).await.unwrap_err();
        assert_eq!(err.kind, fleet_model::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_locks_on_the_same_path_coexist() {
        let (dir, manager) = fresh_manager().await;
        let file = dir.path().join("d.ts");
        std::fs::write(&file, b"hello").unwrap();
        let file = file.to_str().unwrap();

        let spc1 = SpecialistId::generate();
        let spc2 = SpecialistId::generate();

        let first = manager.acquire(file, &spc1, 60_000, LockPurpose::Read, None).await.unwrap();
        assert!(matches!(first, AcquireOutcome::Acquired(_)));
        let second = manager.acquire(file, &spc2, 60_000, LockPurpose::Read, None).await.unwrap();
        assert!(matches!(second, AcquireOutcome::Acquired(_)));
    }
}
