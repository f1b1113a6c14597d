//! The Recovery Engine — stale-mission `Detect` and
//! checkpoint-driven `Restore`, which rebuilds projection state by
//! re-emitting events rather than writing projection rows directly.
//!
//! Nothing here trusts a persisted lock or message state directly — every
//! restored value is re-derived through an appended event, the same way
//! live state is. Restore runs as three per-entity-kind passes, in order:
//! sorties, then locks, then messages.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_checkpoint::CheckpointEngine;
use fleet_locks::{LockManager, ReacquireOutcome};
use fleet_mailbox::MailboxService;
use fleet_model::{
    Checkpoint, CheckpointId, CoreError, CoreResult, Event, Lock, MissionId, MissionStatus, NewEvent, Sortie,
    SortieSnapshot, SortieStatus, StreamType,
};
use fleet_projections::{queries, Ledger};
use serde_json::json;
use tracing::warn;

/// A mission [`detect`] flags as possibly abandoned.
#[derive(Debug, Clone)]
pub struct StaleMissionCandidate {
    pub mission_id: MissionId,
    pub latest_checkpoint_id: Option<CheckpointId>,
    pub latest_event: Event,
    pub age_ms: i64,
    /// `0.0` just past the threshold, approaching `1.0` the longer the
    /// mission has gone quiet. Not a probability — a ranking signal for
    /// an operator triaging several candidates at once.
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RestoredCounts {
    pub sorties: usize,
    pub locks: usize,
    pub messages: usize,
}

#[derive(Debug, Clone)]
pub struct LockConflict {
    pub normalized_path: String,
    pub existing_lock: Lock,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub checkpoint_id: CheckpointId,
    pub dry_run: bool,
    pub success: bool,
    pub restored: RestoredCounts,
    pub conflicts: Vec<LockConflict>,
    /// Set when `success` is `false`: the error that stopped the restore.
    pub error: Option<String>,
}

pub struct RecoveryEngine {
    ledger: Ledger,
    locks: LockManager,
    mailbox: MailboxService,
    checkpoints: CheckpointEngine,
}

impl RecoveryEngine {
    pub fn new(ledger: Ledger, locks: LockManager, mailbox: MailboxService, checkpoints: CheckpointEngine) -> Self {
        Self { ledger, locks, mailbox, checkpoints }
    }

    /// `Detect(activity_threshold)`: missions still
    /// `in_progress` whose stream has gone quiet longer than
    /// `activity_threshold`, ranked by how stale they are.
    pub async fn detect(&self, activity_threshold: ChronoDuration) -> CoreResult<Vec<StaleMissionCandidate>> {
        let pool = self.ledger.store().pool();
        let in_progress = queries::list_missions(pool, Some(MissionStatus::InProgress), i64::MAX, 0).await?;
        let now = Utc::now();

        let mut candidates = Vec::new();
        for mission in in_progress {
            let events = fleet_eventlog::get_by_stream(pool, StreamType::Mission, mission.id.as_str(), None).await?;
            let Some(latest) = events.last() else {
                // Every mission has at least a `mission_created` event; an
                // empty stream here would itself be a corruption, but
                // `detect` is a read-only query, not the place to raise it.
                continue;
            };
            let age = now - latest.recorded_at;
            if age <= activity_threshold {
                continue;
            }

            let latest_checkpoint_id = self.checkpoints.get_latest(&mission.id).await?.map(|c| c.id);
            candidates.push(StaleMissionCandidate {
                mission_id: mission.id,
                latest_checkpoint_id,
                latest_event: latest.clone(),
                age_ms: age.num_milliseconds(),
                confidence: confidence_score(age, activity_threshold),
            });
        }

        candidates.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        Ok(candidates)
    }

    /// `Restore(checkpoint_id, dry_run?)`.
    ///
    /// `dry_run` computes and reports the same plan without appending any
    /// event, reacquiring any lock, or requeuing any message — callers
    /// evaluating a candidate from [`RecoveryEngine::detect`] can preview
    /// the blast radius before committing to it.
    ///
    /// A live restore opens a single write transaction up front and threads
    /// it through every step — sorties, then locks, then messages, then
    /// marking the checkpoint consumed — via each owning service's `_in_tx`
    /// primitive. The transaction commits once, at the very end; any step
    /// failing rolls the whole thing back, so a partial restore is never
    /// observable.
    pub async fn restore(&self, checkpoint_id: &CheckpointId, dry_run: bool) -> CoreResult<RestoreReport> {
        let checkpoint = self
            .checkpoints
            .get_by_id(checkpoint_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("checkpoint {checkpoint_id} not found")))?;

        if dry_run {
            return self.preview(checkpoint).await;
        }

        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;

            match self.restore_in_tx(&mut write.tx, &checkpoint, checkpoint_id).await {
                Ok(report) => {
                    write.commit().await?;
                    self.ledger.store().note_write_committed();
                    Ok(report)
                }
                Err((restored, conflicts, e)) => {
                    write.rollback().await?;
                    Ok(failure(checkpoint_id, restored, conflicts, e))
                }
            }
        })
        .await
    }

    /// The body of a live restore, run inside the write transaction opened
    /// by [`restore`]. Returns `Err((restored-so-far, conflicts-so-far,
    /// error))` on the first failing step so the caller can roll back and
    /// build a `RestoreReport` with exactly what had been computed.
    async fn restore_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        checkpoint: &Checkpoint,
        checkpoint_id: &CheckpointId,
    ) -> Result<RestoreReport, (RestoredCounts, Vec<LockConflict>, CoreError)> {
        let mut restored = RestoredCounts::default();

        self.restore_sorties(tx, checkpoint, &mut restored).await.map_err(|e| (restored.clone(), Vec::new(), e))?;

        self.release_locks_outside_checkpoint(tx, checkpoint).await.map_err(|e| (restored.clone(), Vec::new(), e))?;

        let outcomes = self
            .locks
            .reacquire_in_tx(tx, &checkpoint.active_locks)
            .await
            .map_err(|e| (restored.clone(), Vec::new(), e))?;
        let mut conflicts = Vec::new();
        for (snapshot, outcome) in checkpoint.active_locks.iter().zip(outcomes) {
            match outcome {
                ReacquireOutcome::Reacquired(_) => restored.locks += 1,
                ReacquireOutcome::Conflict { existing_lock } => {
                    conflicts.push(LockConflict { normalized_path: snapshot.normalized_path.clone(), existing_lock });
                }
            }
        }

        for message in &checkpoint.pending_messages {
            self.mailbox
                .requeue_in_tx(tx, &message.id)
                .await
                .map_err(|e| (restored.clone(), conflicts.clone(), e))?;
            restored.messages += 1;
        }

        self.checkpoints
            .mark_consumed_in_tx(tx, checkpoint_id)
            .await
            .map_err(|e| (restored.clone(), conflicts.clone(), e))?;

        Ok(RestoreReport {
            checkpoint_id: checkpoint_id.clone(),
            dry_run: false,
            success: true,
            restored,
            conflicts,
            error: None,
        })
    }

    async fn preview(&self, checkpoint: Checkpoint) -> CoreResult<RestoreReport> {
        let pool = self.ledger.store().pool();
        let now = Utc::now();

        let mut restored = RestoredCounts::default();
        for snapshot in &checkpoint.sorties {
            if queries::get_sortie(pool, &snapshot.id).await?.is_some() {
                restored.sorties += 1;
            }
        }

        let mut conflicts = Vec::new();
        for snapshot in &checkpoint.active_locks {
            if let Some(existing) = queries::get_active_lock_by_path(pool, &snapshot.normalized_path, now).await? {
                if existing.reserved_by != snapshot.reserved_by {
                    conflicts.push(LockConflict { normalized_path: snapshot.normalized_path.clone(), existing_lock: existing });
                    continue;
                }
            }
            restored.locks += 1;
        }

        restored.messages = checkpoint.pending_messages.len();

        Ok(RestoreReport {
            checkpoint_id: checkpoint.id,
            dry_run: true,
            success: true,
            restored,
            conflicts,
            error: None,
        })
    }

    /// Step 3: diff each sortie snapshot against its current projection row
    /// and append only the events needed to converge on the snapshot state,
    /// never writing the projection table directly. A sortie the mission no
    /// longer has is skipped with a warning, not an error.
    async fn restore_sorties(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        checkpoint: &Checkpoint,
        restored: &mut RestoredCounts,
    ) -> CoreResult<()> {
        for snapshot in &checkpoint.sorties {
            let Some(current) = queries::get_sortie_in_tx(tx, &snapshot.id).await? else {
                warn!(sortie_id = %snapshot.id, "checkpoint references a sortie that no longer exists, skipping");
                continue;
            };

            for input in diff_sortie_events(&current, snapshot) {
                self.ledger.append_in_tx(tx, input).await?;
            }
            restored.sorties += 1;
        }
        Ok(())
    }

    /// Step 4 prerequisite: any lock a checkpointed
    /// specialist currently holds that is *not* part of the checkpoint's
    /// `active_locks` snapshot was acquired after the checkpoint was taken
    /// and has no place in the restored state — force-release it via an
    /// event before `Lock.Reacquire` re-establishes the snapshot's locks.
    async fn release_locks_outside_checkpoint(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        checkpoint: &Checkpoint,
    ) -> CoreResult<()> {
        let snapshot_paths: std::collections::HashSet<&str> =
            checkpoint.active_locks.iter().map(|s| s.normalized_path.as_str()).collect();

        let mut assigned_specialists: Vec<_> = checkpoint.sorties.iter().filter_map(|s| s.assigned_to.clone()).collect();
        assigned_specialists.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assigned_specialists.dedup();

        for specialist_id in &assigned_specialists {
            for lock in queries::list_locks_by_specialist_in_tx(tx, specialist_id).await? {
                if lock.status != fleet_model::LockStatus::Active {
                    continue;
                }
                if snapshot_paths.contains(lock.normalized_path.as_str()) {
                    continue;
                }
                self.locks
                    .force_release_in_tx(tx, &lock.id, &format!("not part of checkpoint {}", checkpoint.id))
                    .await?;
            }
        }
        Ok(())
    }
}

fn failure(checkpoint_id: &CheckpointId, restored: RestoredCounts, conflicts: Vec<LockConflict>, e: CoreError) -> RestoreReport {
    RestoreReport {
        checkpoint_id: checkpoint_id.clone(),
        dry_run: false,
        success: false,
        restored,
        conflicts,
        error: Some(e.to_string()),
    }
}

fn confidence_score(age: ChronoDuration, threshold: ChronoDuration) -> f64 {
    let threshold_ms = threshold.num_milliseconds().max(1) as f64;
    let age_ms = age.num_milliseconds().max(0) as f64;
    (1.0 - threshold_ms / age_ms.max(threshold_ms)).clamp(0.0, 1.0)
}

/// Builds the minimal set of `sortie_*` events that move `current` to
/// `snapshot`'s shape. Order matters: unblocking/assignment/status changes
/// happen before the progress figure is reasserted.
fn diff_sortie_events(current: &Sortie, snapshot: &SortieSnapshot) -> Vec<NewEvent> {
    let mut events = Vec::new();
    let stream_id = snapshot.id.as_str();

    if snapshot.assigned_to.is_some() && snapshot.assigned_to != current.assigned_to {
        events.push(NewEvent::new(
            "sortie_assigned",
            StreamType::Sortie,
            stream_id,
            json!({"specialist_id": snapshot.assigned_to.as_ref().map(|s| s.as_str())}),
        ));
    }

    if snapshot.status != current.status {
        match snapshot.status {
            SortieStatus::Pending => {
                warn!(sortie_id = %snapshot.id, "cannot restore a sortie back to pending, leaving current status");
            }
            SortieStatus::InProgress if current.status == SortieStatus::Blocked => {
                events.push(NewEvent::new("sortie_unblocked", StreamType::Sortie, stream_id, json!({})));
            }
            SortieStatus::InProgress => {
                events.push(NewEvent::new("sortie_started", StreamType::Sortie, stream_id, json!({})));
            }
            SortieStatus::Blocked => {
                events.push(NewEvent::new(
                    "sortie_blocked",
                    StreamType::Sortie,
                    stream_id,
                    json!({"blocked_by": snapshot.blocked_by, "reason": snapshot.blocked_reason}),
                ));
            }
            SortieStatus::Assigned => {
                // Covered by the assignment event above when `assigned_to`
                // is set; nothing further distinguishes `assigned` itself.
            }
            SortieStatus::Review => {
                events.push(NewEvent::new("sortie_review", StreamType::Sortie, stream_id, json!({})));
            }
            SortieStatus::Completed => {
                events.push(NewEvent::new("sortie_completed", StreamType::Sortie, stream_id, json!({"result": null})));
            }
            SortieStatus::Failed => {
                events.push(NewEvent::new("sortie_failed", StreamType::Sortie, stream_id, json!({})));
            }
            SortieStatus::Cancelled => {
                events.push(NewEvent::new("sortie_cancelled", StreamType::Sortie, stream_id, json!({})));
            }
        }
    }

    if snapshot.progress != current.progress && !matches!(snapshot.status, SortieStatus::Completed) {
        events.push(NewEvent::new(
            "sortie_progress",
            StreamType::Sortie,
            stream_id,
            json!({"progress": snapshot.progress, "notes": null}),
        ));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::{CasePolicy, SpecialistId};
    use std::sync::Arc;

    async fn fresh() -> (tempfile::TempDir, RecoveryEngine, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            fleet_store::Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
                .await
                .unwrap(),
        );
        let ledger = Ledger::new(store.clone());
        let locks = LockManager::new(ledger.clone(), CasePolicy::Sensitive);
        let mailbox = MailboxService::new(ledger.clone());
        let checkpoints = CheckpointEngine::new(ledger.clone(), dir.path().join("checkpoints"));
        let recovery = RecoveryEngine::new(ledger.clone(), locks, mailbox, checkpoints);
        (dir, recovery, ledger)
    }

    async fn seed_mission(ledger: &Ledger) -> MissionId {
        let mission_id = MissionId::generate();
        ledger
            .append(NewEvent::new(
                "mission_created",
                StreamType::Mission,
                mission_id.as_str(),
                json!({"title": "t", "description": "d", "priority": "medium", "metadata": {}}),
            ))
            .await
            .unwrap();
        ledger
            .append(NewEvent::new("mission_started", StreamType::Mission, mission_id.as_str(), json!({})))
            .await
            .unwrap();
        mission_id
    }

    #[tokio::test]
    async fn detect_flags_a_quiet_in_progress_mission_but_not_a_fresh_one() {
        let (_dir, recovery, ledger) = fresh().await;
        let stale_mission = seed_mission(&ledger).await;
        let fresh_mission = seed_mission(&ledger).await;

        // Backdate the stale mission's latest event by rewriting its
        // recorded_at directly — the only way to simulate elapsed time
        // without a real clock in a unit test.
        sqlx::query("UPDATE events SET recorded_at = ? WHERE stream_id = ?")
            .bind((Utc::now() - ChronoDuration::hours(2)).to_rfc3339())
            .bind(stale_mission.as_str())
            .execute(ledger.store().pool())
            .await
            .unwrap();

        let candidates = recovery.detect(ChronoDuration::minutes(30)).await.unwrap();
        let ids: Vec<_> = candidates.iter().map(|c| c.mission_id.clone()).collect();
        assert!(ids.contains(&stale_mission));
        assert!(!ids.contains(&fresh_mission));
    }

    #[tokio::test]
    async fn restore_requeues_messages_and_reports_progress() {
        let (_dir, recovery, ledger) = fresh().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();

        let sortie_id = fleet_model::SortieId::generate();
        ledger
            .append(NewEvent::new(
                "sortie_created",
                StreamType::Sortie,
                sortie_id.as_str(),
                json!({
                    "mission_id": mission_id.as_str(),
                    "title": "do the thing",
                    "priority": "medium",
                    "files": ["a.rs"],
                    "metadata": {},
                }),
            ))
            .await
            .unwrap();

        let checkpoints = CheckpointEngine::new(ledger.clone(), _dir.path().join("checkpoints"));
        let checkpoint = checkpoints
            .on_manual_request(&mission_id, &specialist_id, None)
            .await
            .unwrap();

        // Progress the sortie after the checkpoint was taken, so Restore
        // has to converge it back to the snapshot's pre-progress state.
        ledger
            .append(NewEvent::new(
                "sortie_progress",
                StreamType::Sortie,
                sortie_id.as_str(),
                json!({"progress": 80, "notes": null}),
            ))
            .await
            .unwrap();

        let report = recovery.restore(&checkpoint.id, false).await.unwrap();
        assert!(report.success);
        assert_eq!(report.restored.sorties, 1);

        let restored_sortie = queries::get_sortie(ledger.store().pool(), &sortie_id).await.unwrap().unwrap();
        assert_eq!(restored_sortie.progress, 0);

        let consumed = checkpoints.get_by_id(&checkpoint.id).await.unwrap().unwrap();
        assert!(consumed.consumed_at.is_some());
    }

    #[tokio::test]
    async fn dry_run_restore_does_not_mutate_anything() {
        let (_dir, recovery, ledger) = fresh().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();
        let checkpoints = CheckpointEngine::new(ledger.clone(), _dir.path().join("checkpoints"));
        let checkpoint = checkpoints
            .on_manual_request(&mission_id, &specialist_id, None)
            .await
            .unwrap();

        let report = recovery.restore(&checkpoint.id, true).await.unwrap();
        assert!(report.dry_run);
        assert!(report.success);

        let reloaded = checkpoints.get_by_id(&checkpoint.id).await.unwrap().unwrap();
        assert!(reloaded.consumed_at.is_none());
    }
}
