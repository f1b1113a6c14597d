//! On-disk checkpoint artifacts: one JSON file
//! per checkpoint under `<data_dir>/checkpoints/`, plus a `latest.json`
//! pointer to the most recently written artifact across all missions.
//!
//! Writes go through write-to-temp + rename so a crash never leaves a
//! half-written `.json` file behind for [`load_from_file`] to trip over.

use std::fs;
use std::path::{Path, PathBuf};

use fleet_model::{Checkpoint, CheckpointId, CoreError, CoreResult};

pub fn artifact_path(dir: &Path, id: &CheckpointId) -> PathBuf {
    dir.join(format!("{id}.json"))
}

fn latest_pointer_path(dir: &Path) -> PathBuf {
    dir.join("latest.json")
}

/// Writes the checkpoint's JSON artifact and repoints `latest.json` at it,
/// both via write-to-temp + rename.
pub fn write_artifact(dir: &Path, checkpoint: &Checkpoint) -> CoreResult<()> {
    fs::create_dir_all(dir).map_err(|e| CoreError::internal(format!("create checkpoints dir: {e}")))?;

    let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| CoreError::internal(format!("serialize checkpoint artifact: {e}")))?;
    let target = artifact_path(dir, &checkpoint.id);
    write_atomic(&target, &body)?;

    repoint_latest(dir, &target)?;
    Ok(())
}

/// Reads a checkpoint artifact back from disk. `NotFound` (rather than a
/// deserialization error) is the only kind [`crate::CheckpointEngine`]
/// treats as "this checkpoint's DB row is also gone" — see its
/// `get_by_id` doc comment.
pub fn load_from_file(dir: &Path, id: &CheckpointId) -> CoreResult<Checkpoint> {
    let path = artifact_path(dir, id);
    let body = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::not_found(format!("checkpoint artifact {id} not found"))
        } else {
            CoreError::internal(format!("read checkpoint artifact {id}: {e}"))
        }
    })?;
    serde_json::from_slice(&body).map_err(|e| CoreError::corruption(format!("checkpoint artifact {id} not JSON: {e}")))
}

/// Best-effort delete used by [`crate::CheckpointEngine::prune`]. A missing
/// file is not an error — the artifact may already be gone from a prior
/// partial prune.
pub fn remove_artifact(dir: &Path, id: &CheckpointId) {
    let path = artifact_path(dir, id);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(checkpoint_id = %id, error = %e, "failed to remove checkpoint artifact");
        }
    }
}

fn write_atomic(target: &Path, body: &[u8]) -> CoreResult<()> {
    let tmp = target.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| CoreError::internal(format!("write checkpoint artifact temp file: {e}")))?;
    fs::rename(&tmp, target).map_err(|e| CoreError::internal(format!("rename checkpoint artifact into place: {e}")))?;
    Ok(())
}

#[cfg(unix)]
fn repoint_latest(dir: &Path, target: &Path) -> CoreResult<()> {
    use std::os::unix::fs::symlink;

    let pointer = latest_pointer_path(dir);
    let tmp = dir.join("latest.json.tmp");
    let _ = fs::remove_file(&tmp);
    symlink(target, &tmp).map_err(|e| CoreError::internal(format!("symlink latest checkpoint pointer: {e}")))?;
    fs::rename(&tmp, &pointer).map_err(|e| CoreError::internal(format!("rename latest checkpoint pointer into place: {e}")))?;
    Ok(())
}

#[cfg(not(unix))]
fn repoint_latest(dir: &Path, target: &Path) -> CoreResult<()> {
    let body = fs::read(target).map_err(|e| CoreError::internal(format!("read checkpoint artifact for latest pointer: {e}")))?;
    write_atomic(&latest_pointer_path(dir), &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::{CheckpointTrigger, MissionId, RecoveryContext, SpecialistId};
    use chrono::Utc;

    fn sample_checkpoint() -> Checkpoint {
        Checkpoint {
            id: CheckpointId::generate(),
            mission_id: MissionId::generate(),
            timestamp: Utc::now(),
            trigger: CheckpointTrigger::Manual,
            progress_percent: 0,
            sorties: vec![],
            active_locks: vec![],
            pending_messages: vec![],
            recovery_context: RecoveryContext {
                last_action: None,
                next_steps: vec![],
                blockers: vec![],
                files_modified: vec![],
                mission_summary: None,
                elapsed_time_ms: 0,
                last_activity_at: Utc::now(),
            },
            created_by: SpecialistId::generate(),
            expires_at: None,
            consumed_at: None,
            version: 1,
        }
    }

    #[test]
    fn round_trips_through_disk_and_maintains_the_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = sample_checkpoint();

        write_artifact(dir.path(), &checkpoint).unwrap();
        let loaded = load_from_file(dir.path(), &checkpoint.id).unwrap();
        assert_eq!(loaded.id, checkpoint.id);

        let pointer_target = fs::canonicalize(latest_pointer_path(dir.path())).unwrap();
        let artifact_target = fs::canonicalize(artifact_path(dir.path(), &checkpoint.id)).unwrap();
        assert_eq!(pointer_target, artifact_target);
    }

    #[test]
    fn load_from_file_reports_not_found_for_a_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_file(dir.path(), &CheckpointId::generate()).unwrap_err();
        assert_eq!(err.kind, fleet_model::ErrorKind::NotFound);
    }

    #[test]
    fn remove_artifact_is_a_noop_when_the_file_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        remove_artifact(dir.path(), &CheckpointId::generate());
    }
}
