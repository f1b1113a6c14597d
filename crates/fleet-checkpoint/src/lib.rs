//! The Checkpoint Engine — point-in-time mission snapshots
//! persisted to both the `checkpoints` table and a JSON file under
//! `<data_dir>/checkpoints/`, with a `latest.json` pointer kept current per
//! mission.
//!
//! When the DB row and the file mirror disagree, the DB row always wins —
//! the file is a disaster-recovery artifact, not a second source of truth.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_model::{
    Checkpoint, CheckpointId, CheckpointTrigger, CoreError, CoreResult, LockSnapshot, MessageSnapshot,
    MissionId, NewCheckpoint, NewEvent, RecoveryContext, SortieSnapshot, SpecialistId, StreamType,
};
use fleet_projections::{queries, Ledger};
use serde_json::json;
use sqlx::Row;

mod persist;

pub use persist::load_from_file;

/// Progress percentages that trigger an automatic checkpoint the first time
/// a mission's progress crosses them.
pub const PROGRESS_THRESHOLDS: [i32; 4] = [25, 50, 75, 100];

#[derive(Clone)]
pub struct CheckpointEngine {
    ledger: Ledger,
    checkpoints_dir: PathBuf,
}

impl CheckpointEngine {
    pub fn new(ledger: Ledger, checkpoints_dir: PathBuf) -> Self {
        Self { ledger, checkpoints_dir }
    }

    /// `Create`.
    ///
    /// Step 1 (spec §4.6): all of the mission/sorties/locks/messages reads
    /// below run inside one `ReadTxn` against the Store, so the snapshot
    /// they produce reflects a single event-log prefix rather than a
    /// mixture of whatever committed between separate queries (§8: "A
    /// checkpoint's `sorties`, `active_locks`, and `pending_messages` are
    /// consistent with a single event-log prefix"). The read transaction is
    /// dropped (a no-op rollback) once the snapshot is in hand; the JSON
    /// artifact is then written to disk, and only after that is the DB row
    /// inserted and the `checkpoint_created` event appended in one write
    /// transaction. That ordering means a crash between the file write and
    /// the DB commit leaves an orphan file rather than a DB row with no
    /// backing artifact — the orphan-file case is exactly what load-time
    /// validation is written to tolerate.
    pub async fn create(&self, input: NewCheckpoint) -> CoreResult<Checkpoint> {
        let mut read = self.ledger.store().begin_read().await?;

        let mission = queries::get_mission_in_tx(&mut read.tx, &input.mission_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("mission {} not found", input.mission_id)))?;

        let sorties = queries::list_sorties_by_mission_in_tx(&mut read.tx, &input.mission_id).await?;
        let mut sortie_snapshots: Vec<SortieSnapshot> = sorties
            .iter()
            .map(|s| SortieSnapshot {
                id: s.id.clone(),
                title: s.title.clone(),
                status: s.status,
                priority: s.priority,
                assigned_to: s.assigned_to.clone(),
                progress: s.progress,
                files: s.files.clone(),
                blocked_by: s.blocked_by.clone(),
                blocked_reason: s.blocked_reason.clone(),
            })
            .collect();
        sortie_snapshots.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        let assigned_specialists: Vec<SpecialistId> = {
            let mut ids: Vec<SpecialistId> = sorties.iter().filter_map(|s| s.assigned_to.clone()).collect();
            ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            ids.dedup();
            ids
        };

        let active_locks = queries::list_active_locks_in_tx(&mut read.tx).await?;
        let mut lock_snapshots: Vec<LockSnapshot> = active_locks
            .into_iter()
            .filter(|lock| assigned_specialists.contains(&lock.reserved_by))
            .map(|lock| LockSnapshot {
                id: lock.id,
                file: lock.file,
                normalized_path: lock.normalized_path,
                reserved_by: lock.reserved_by,
                purpose: lock.purpose,
                checksum: lock.checksum,
                expires_at: lock.expires_at,
            })
            .collect();
        lock_snapshots.sort_by(|a, b| a.normalized_path.cmp(&b.normalized_path));

        let mut message_snapshots = Vec::new();
        for specialist_id in &assigned_specialists {
            let Some(mailbox) = queries::get_mailbox_by_owner_in_tx(&mut read.tx, specialist_id).await? else {
                continue;
            };
            let pending =
                queries::list_messages_in_tx(&mut read.tx, &mailbox.mailbox_id, Some(fleet_model::MessageStatus::Pending)).await?;
            message_snapshots.extend(pending.into_iter().map(|m| MessageSnapshot {
                id: m.id,
                mailbox_id: m.mailbox_id,
                message_type: m.message_type,
                content: m.content,
                priority: m.priority,
                sent_at: m.sent_at,
            }));
        }
        message_snapshots.sort_by_key(|m| m.sent_at);

        let recovery_context = self.compute_recovery_context(&mut read.tx, &input.mission_id, &mission, &sorties).await?;
        drop(read);

        let progress_percent = input.progress_percent.unwrap_or_else(|| {
            if mission.total_sorties == 0 {
                0
            } else {
                (mission.completed_sorties as i64 * 100 / mission.total_sorties as i64) as i32
            }
        });

        let checkpoint_id = CheckpointId::generate();
        let now = Utc::now();
        let expires_at = input.ttl_hours.map(|h| now + ChronoDuration::hours(h));

        let checkpoint = Checkpoint {
            id: checkpoint_id,
            mission_id: input.mission_id.clone(),
            timestamp: now,
            trigger: input.trigger,
            progress_percent,
            sorties: sortie_snapshots,
            active_locks: lock_snapshots,
            pending_messages: message_snapshots,
            recovery_context,
            created_by: input.created_by.clone(),
            expires_at,
            consumed_at: None,
            version: 1,
        };

        persist::write_artifact(&self.checkpoints_dir, &checkpoint)?;

        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;

            let insert_result = sqlx::query(
                "INSERT INTO checkpoints \
                 (id, mission_id, timestamp, trigger, progress_percent, sorties, active_locks, \
                  pending_messages, recovery_context, created_by, expires_at, consumed_at, version) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
            )
            .bind(checkpoint.id.as_str())
            .bind(checkpoint.mission_id.as_str())
            .bind(checkpoint.timestamp.to_rfc3339())
            .bind(checkpoint.trigger.as_str())
            .bind(checkpoint.progress_percent)
            .bind(json_text(&checkpoint.sorties)?)
            .bind(json_text(&checkpoint.active_locks)?)
            .bind(json_text(&checkpoint.pending_messages)?)
            .bind(json_text(&checkpoint.recovery_context)?)
            .bind(checkpoint.created_by.as_str())
            .bind(checkpoint.expires_at.map(|d| d.to_rfc3339()))
            .bind(checkpoint.version)
            .execute(&mut *write.tx)
            .await;

            match insert_result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if is_unique_violation(&db_err) => {
                    // Another caller already recorded the checkpoint for this
                    // (mission_id, trigger, progress_percent) triple. Treat as idempotent rather than failing.
                    write.rollback().await?;
                    let existing = self
                        .existing_progress_checkpoint(&input.mission_id, input.trigger, progress_percent)
                        .await?
                        .ok_or_else(|| CoreError::internal("progress checkpoint uniqueness conflict but no existing row found"))?;
                    return Ok(existing);
                }
                Err(e) => return Err(CoreError::internal(format!("insert checkpoint: {e}"))),
            }

            self.ledger
                .append_in_tx(
                    &mut write.tx,
                    NewEvent::new(
                        "checkpoint_created",
                        StreamType::Checkpoint,
                        checkpoint.id.as_str(),
                        json!({
                            "mission_id": checkpoint.mission_id.as_str(),
                            "trigger": checkpoint.trigger.as_str(),
                            "progress_percent": checkpoint.progress_percent,
                            "created_by": checkpoint.created_by.as_str(),
                        }),
                    ),
                )
                .await?;

            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(checkpoint.clone())
        })
        .await
    }

    /// `OnProgress(mission_id, new_progress_percent)`: create a
    /// checkpoint the first time progress crosses a threshold. The database
    /// unique index is the real enforcement; this just avoids issuing a
    /// redundant `Create` call for thresholds already passed.
    pub async fn on_progress(
        &self,
        mission_id: &MissionId,
        created_by: &SpecialistId,
        new_progress_percent: i32,
    ) -> CoreResult<Option<Checkpoint>> {
        let mut threshold = None;
        for candidate in PROGRESS_THRESHOLDS {
            if new_progress_percent < candidate {
                continue;
            }
            if self
                .existing_progress_checkpoint(mission_id, CheckpointTrigger::Progress, candidate)
                .await?
                .is_none()
            {
                threshold = Some(candidate);
            }
        }
        let Some(threshold) = threshold else {
            return Ok(None);
        };

        let checkpoint = self
            .create(NewCheckpoint {
                mission_id: mission_id.clone(),
                trigger: CheckpointTrigger::Progress,
                trigger_details: Some(json!({"threshold": threshold})),
                created_by: created_by.clone(),
                progress_percent: Some(threshold),
                ttl_hours: None,
            })
            .await?;
        Ok(Some(checkpoint))
    }

    /// `OnError(mission_id, error_details)`: always creates a
    /// checkpoint, regardless of progress — errors are not deduplicated by
    /// threshold.
    pub async fn on_error(
        &self,
        mission_id: &MissionId,
        created_by: &SpecialistId,
        error_details: serde_json::Value,
    ) -> CoreResult<Checkpoint> {
        self.create(NewCheckpoint {
            mission_id: mission_id.clone(),
            trigger: CheckpointTrigger::Error,
            trigger_details: Some(error_details),
            created_by: created_by.clone(),
            progress_percent: None,
            ttl_hours: None,
        })
        .await
    }

    /// `OnManualRequest`: an operator- or specialist-initiated
    /// checkpoint, e.g. before a risky operation.
    pub async fn on_manual_request(
        &self,
        mission_id: &MissionId,
        created_by: &SpecialistId,
        note: Option<String>,
    ) -> CoreResult<Checkpoint> {
        self.create(NewCheckpoint {
            mission_id: mission_id.clone(),
            trigger: CheckpointTrigger::Manual,
            trigger_details: note.map(|n| json!({"note": n})),
            created_by: created_by.clone(),
            progress_percent: None,
            ttl_hours: None,
        })
        .await
    }

    /// `GetById`: DB row is authoritative; the JSON file is
    /// consulted only when the row is altogether missing (orphan-file
    /// recovery case from [`CheckpointEngine::create`]'s doc comment).
    pub async fn get_by_id(&self, id: &CheckpointId) -> CoreResult<Option<Checkpoint>> {
        if let Some(checkpoint) = self.row_by_id(id).await? {
            return Ok(Some(checkpoint));
        }
        match persist::load_from_file(&self.checkpoints_dir, id) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) if e.kind == fleet_model::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_latest(&self, mission_id: &MissionId) -> CoreResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE mission_id = ? ORDER BY timestamp DESC LIMIT 1")
            .bind(mission_id.as_str())
            .fetch_optional(self.ledger.store().pool())
            .await
            .map_err(|e| CoreError::internal(format!("get_latest checkpoint: {e}")))?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    pub async fn list_by_mission(&self, mission_id: &MissionId) -> CoreResult<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE mission_id = ? ORDER BY timestamp ASC")
            .bind(mission_id.as_str())
            .fetch_all(self.ledger.store().pool())
            .await
            .map_err(|e| CoreError::internal(format!("list_by_mission checkpoints: {e}")))?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    /// `GetPrunable(older_than_days, keep_per_mission, include_completed)`
    ///: checkpoints older than the cutoff, minus the most
    /// recent `keep_per_mission` per mission. `include_completed` gates
    /// whether checkpoints belonging to a `completed`/`cancelled` mission
    /// are eligible at all — by default a mission still in flight is
    /// pruned more eagerly than one whose history might still be audited.
    pub async fn get_prunable(
        &self,
        older_than_days: i64,
        keep_per_mission: i64,
        include_completed: bool,
    ) -> CoreResult<Vec<Checkpoint>> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let pool = self.ledger.store().pool();

        let rows = sqlx::query("SELECT DISTINCT mission_id FROM checkpoints")
            .fetch_all(pool)
            .await
            .map_err(|e| CoreError::internal(format!("list checkpoint mission_ids: {e}")))?;

        let mut prunable = Vec::new();
        for row in rows {
            let mission_id_raw: String = row.try_get("mission_id").map_err(|e| CoreError::internal(e.to_string()))?;
            let mission_id = MissionId::parse(mission_id_raw)?;

            if !include_completed {
                match queries::get_mission(pool, &mission_id).await? {
                    Some(mission) if mission.status.is_terminal() => continue,
                    Some(_) => {}
                    None => continue,
                }
            }

            let all = self.list_by_mission(&mission_id).await?;
            if all.len() as i64 <= keep_per_mission {
                continue;
            }
            let keep_from = all.len() - keep_per_mission.max(0) as usize;
            prunable.extend(all.into_iter().take(keep_from).filter(|c| c.timestamp < cutoff));
        }

        prunable.sort_by_key(|c| c.timestamp);
        Ok(prunable)
    }

    /// Deletes every checkpoint [`CheckpointEngine::get_prunable`] names,
    /// both the DB row and its on-disk artifact. Returns the number pruned.
    pub async fn prune(&self, older_than_days: i64, keep_per_mission: i64, include_completed: bool) -> CoreResult<usize> {
        let prunable = self.get_prunable(older_than_days, keep_per_mission, include_completed).await?;
        let count = prunable.len();
        for checkpoint in prunable {
            sqlx::query("DELETE FROM checkpoints WHERE id = ?")
                .bind(checkpoint.id.as_str())
                .execute(self.ledger.store().pool())
                .await
                .map_err(|e| CoreError::internal(format!("delete checkpoint row: {e}")))?;
            persist::remove_artifact(&self.checkpoints_dir, &checkpoint.id);
        }
        Ok(count)
    }

    /// Transaction-scoped variant of [`mark_consumed`], used by
    /// `fleet-recovery::restore` so consuming the checkpoint lands in the
    /// same transaction as the sortie/lock/message restores it follows.
    pub async fn mark_consumed_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        id: &CheckpointId,
    ) -> CoreResult<Checkpoint> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| CoreError::internal(format!("get checkpoint for mark_consumed: {e}")))?
            .ok_or_else(|| CoreError::not_found(format!("checkpoint {id} not found")))?;
        let mut checkpoint = row_to_checkpoint(&row)?;

        if checkpoint.consumed_at.is_some() {
            return Ok(checkpoint);
        }

        let now = Utc::now();
        sqlx::query("UPDATE checkpoints SET consumed_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| CoreError::internal(format!("mark_consumed update: {e}")))?;

        self.ledger
            .append_in_tx(
                tx,
                NewEvent::new(
                    "checkpoint_consumed",
                    StreamType::Checkpoint,
                    id.as_str(),
                    json!({"mission_id": checkpoint.mission_id.as_str()}),
                ),
            )
            .await?;

        checkpoint.consumed_at = Some(now);
        Ok(checkpoint)
    }

    /// `MarkConsumed(id)`: set once Recovery has
    /// used this checkpoint to restore state. Appends `checkpoint_consumed`
    /// rather than relying on the generic projection dispatch, since the
    /// `checkpoints` row update happens directly here.
    pub async fn mark_consumed(&self, id: &CheckpointId) -> CoreResult<Checkpoint> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let checkpoint = self.mark_consumed_in_tx(&mut write.tx, id).await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();
            Ok(checkpoint)
        })
        .await
    }

    async fn row_by_id(&self, id: &CheckpointId) -> CoreResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.ledger.store().pool())
            .await
            .map_err(|e| CoreError::internal(format!("get_by_id checkpoint: {e}")))?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn existing_progress_checkpoint(
        &self,
        mission_id: &MissionId,
        trigger: CheckpointTrigger,
        progress_percent: i32,
    ) -> CoreResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE mission_id = ? AND trigger = ? AND progress_percent = ?")
            .bind(mission_id.as_str())
            .bind(trigger.as_str())
            .bind(progress_percent)
            .fetch_optional(self.ledger.store().pool())
            .await
            .map_err(|e| CoreError::internal(format!("existing_progress_checkpoint: {e}")))?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    /// `recovery_context` derivation: the mission's and
    /// its sorties' event streams are walked for the most recent event
    /// overall (`last_action`/`last_activity_at`), blocked sorties become
    /// `blockers`, and the union of sortie `files` becomes `files_modified`.
    async fn compute_recovery_context(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        mission_id: &MissionId,
        mission: &fleet_model::Mission,
        sorties: &[fleet_model::Sortie],
    ) -> CoreResult<RecoveryContext> {
        let mut latest_event_type: Option<String> = None;
        let mut latest_recorded_at = mission.created_at;

        let mission_events = fleet_eventlog::get_by_stream_in_tx(tx, StreamType::Mission, mission_id.as_str(), None).await?;
        if let Some(last) = mission_events.last() {
            latest_event_type = Some(last.event_type.clone());
            latest_recorded_at = last.recorded_at;
        }

        for sortie in sorties {
            let sortie_events = fleet_eventlog::get_by_stream_in_tx(tx, StreamType::Sortie, sortie.id.as_str(), None).await?;
            if let Some(last) = sortie_events.last() {
                if last.recorded_at >= latest_recorded_at {
                    latest_recorded_at = last.recorded_at;
                    latest_event_type = Some(last.event_type.clone());
                }
            }
        }

        let blockers: Vec<String> = sorties
            .iter()
            .filter(|s| s.status == fleet_model::SortieStatus::Blocked)
            .map(|s| {
                s.blocked_reason
                    .clone()
                    .unwrap_or_else(|| format!("sortie {} is blocked", s.id))
            })
            .collect();

        let mut files_modified: Vec<String> = sorties.iter().flat_map(|s| s.files.clone()).collect();
        files_modified.sort();
        files_modified.dedup();

        let next_steps: Vec<String> = sorties
            .iter()
            .filter(|s| matches!(s.status, fleet_model::SortieStatus::Pending | fleet_model::SortieStatus::Assigned))
            .map(|s| s.title.clone())
            .collect();

        let elapsed_time_ms = (Utc::now() - mission.created_at).num_milliseconds();

        Ok(RecoveryContext {
            last_action: latest_event_type,
            next_steps,
            blockers,
            files_modified,
            mission_summary: Some(truncate(&mission.description, 280)),
            elapsed_time_ms,
            last_activity_at: latest_recorded_at,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::internal(format!("serialize checkpoint field: {e}")))
}

fn is_unique_violation(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    db_err.code().as_deref() == Some("2067") || db_err.message().contains("UNIQUE constraint")
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Checkpoint> {
    let id: String = row.try_get("id").map_err(|e| CoreError::internal(e.to_string()))?;
    let mission_id: String = row.try_get("mission_id").map_err(|e| CoreError::internal(e.to_string()))?;
    let trigger_raw: String = row.try_get("trigger").map_err(|e| CoreError::internal(e.to_string()))?;
    let sorties_raw: String = row.try_get("sorties").map_err(|e| CoreError::internal(e.to_string()))?;
    let active_locks_raw: String = row.try_get("active_locks").map_err(|e| CoreError::internal(e.to_string()))?;
    let pending_messages_raw: String = row.try_get("pending_messages").map_err(|e| CoreError::internal(e.to_string()))?;
    let recovery_context_raw: String = row.try_get("recovery_context").map_err(|e| CoreError::internal(e.to_string()))?;
    let created_by: String = row.try_get("created_by").map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(Checkpoint {
        id: CheckpointId::parse(id)?,
        mission_id: MissionId::parse(mission_id)?,
        timestamp: fleet_store::get_datetime(row, "timestamp")?,
        trigger: parse_trigger(&trigger_raw)?,
        progress_percent: row.try_get("progress_percent").map_err(|e| CoreError::internal(e.to_string()))?,
        sorties: serde_json::from_str(&sorties_raw).map_err(|e| CoreError::corruption(format!("checkpoint sorties not JSON: {e}")))?,
        active_locks: serde_json::from_str(&active_locks_raw)
            .map_err(|e| CoreError::corruption(format!("checkpoint active_locks not JSON: {e}")))?,
        pending_messages: serde_json::from_str(&pending_messages_raw)
            .map_err(|e| CoreError::corruption(format!("checkpoint pending_messages not JSON: {e}")))?,
        recovery_context: serde_json::from_str(&recovery_context_raw)
            .map_err(|e| CoreError::corruption(format!("checkpoint recovery_context not JSON: {e}")))?,
        created_by: SpecialistId::parse(created_by)?,
        expires_at: fleet_store::get_optional_datetime(row, "expires_at")?,
        consumed_at: fleet_store::get_optional_datetime(row, "consumed_at")?,
        version: row.try_get("version").map_err(|e| CoreError::internal(e.to_string()))?,
    })
}

fn parse_trigger(raw: &str) -> CoreResult<CheckpointTrigger> {
    match raw {
        "progress" => Ok(CheckpointTrigger::Progress),
        "error" => Ok(CheckpointTrigger::Error),
        "manual" => Ok(CheckpointTrigger::Manual),
        "compaction" => Ok(CheckpointTrigger::Compaction),
        other => Err(CoreError::corruption(format!("unrecognized checkpoint trigger {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::{CasePolicy, NewMission, NewSortie};
    use std::sync::Arc;

    async fn fresh_engine() -> (tempfile::TempDir, CheckpointEngine, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let store = fleet_store::Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
            .await
            .unwrap();
        let ledger = Ledger::new(Arc::new(store));
        let engine = CheckpointEngine::new(ledger.clone(), dir.path().join("checkpoints"));
        (dir, engine, ledger)
    }

    async fn seed_mission(ledger: &Ledger) -> MissionId {
        let mission_id = MissionId::generate();
        ledger
            .append(NewEvent::new(
                "mission_created",
                StreamType::Mission,
                mission_id.as_str(),
                json!({
                    "title": "test mission",
                    "description": "a mission used in a test",
                    "priority": "medium",
                    "metadata": {},
                }),
            ))
            .await
            .unwrap();
        mission_id
    }

    #[tokio::test]
    async fn create_persists_both_the_db_row_and_the_json_artifact() {
        let (dir, engine, ledger) = fresh_engine().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();

        let checkpoint = engine
            .create(NewCheckpoint {
                mission_id: mission_id.clone(),
                trigger: CheckpointTrigger::Manual,
                trigger_details: None,
                created_by: specialist_id,
                progress_percent: Some(0),
                ttl_hours: None,
            })
            .await
            .unwrap();

        assert!(persist::artifact_path(&dir.path().join("checkpoints"), &checkpoint.id).exists());
        let reloaded = engine.get_by_id(&checkpoint.id).await.unwrap().unwrap();
        assert_eq!(reloaded.id, checkpoint.id);
        assert_eq!(reloaded.mission_id, mission_id);
    }

    #[tokio::test]
    async fn duplicate_progress_checkpoint_is_idempotent_not_an_error() {
        let (_dir, engine, ledger) = fresh_engine().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();

        let first = engine
            .create(NewCheckpoint {
                mission_id: mission_id.clone(),
                trigger: CheckpointTrigger::Progress,
                trigger_details: None,
                created_by: specialist_id.clone(),
                progress_percent: Some(50),
                ttl_hours: None,
            })
            .await
            .unwrap();
        let second = engine
            .create(NewCheckpoint {
                mission_id,
                trigger: CheckpointTrigger::Progress,
                trigger_details: None,
                created_by: specialist_id,
                progress_percent: Some(50),
                ttl_hours: None,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn mark_consumed_is_idempotent_and_appends_an_event() {
        let (_dir, engine, ledger) = fresh_engine().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();

        let checkpoint = engine
            .create(NewCheckpoint {
                mission_id,
                trigger: CheckpointTrigger::Manual,
                trigger_details: None,
                created_by: specialist_id,
                progress_percent: Some(0),
                ttl_hours: None,
            })
            .await
            .unwrap();

        let consumed_once = engine.mark_consumed(&checkpoint.id).await.unwrap();
        assert!(consumed_once.consumed_at.is_some());
        let consumed_twice = engine.mark_consumed(&checkpoint.id).await.unwrap();
        assert_eq!(consumed_once.consumed_at, consumed_twice.consumed_at);
    }

    #[tokio::test]
    async fn get_prunable_keeps_the_most_recent_n_per_mission() {
        let (_dir, engine, ledger) = fresh_engine().await;
        let mission_id = seed_mission(&ledger).await;
        let specialist_id = SpecialistId::generate();

        for i in 0..3 {
            engine
                .create(NewCheckpoint {
                    mission_id: mission_id.clone(),
                    trigger: CheckpointTrigger::Manual,
                    trigger_details: None,
                    created_by: specialist_id.clone(),
                    progress_percent: Some(i * 10),
                    ttl_hours: None,
                })
                .await
                .unwrap();
        }

        // older_than_days = 0 so every checkpoint is technically "old
        // enough"; keep_per_mission = 1 should leave 2 prunable.
        let prunable = engine.get_prunable(0, 1, true).await.unwrap();
        assert_eq!(prunable.len(), 2);
    }
}
