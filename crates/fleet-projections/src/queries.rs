//! Read-only query methods over the projection tables.
//!
//! Decoding is manual, row-to-struct, rather than `sqlx::query_as`, because
//! several columns carry a domain enum or opaque id type that needs its own
//! `FromStr`/`parse`, not a blanket `#[derive(FromRow)]`.
//!
//! These take a `&SqlitePool` directly rather than a `ReadTxn` — callers
//! that need read-your-writes consistency inside an open write transaction
//! should query through `&mut *write.tx` themselves; most read paths (the
//! HTTP API) have no open transaction and read straight off the pool,
//! relying on WAL snapshot isolation.

use chrono::{DateTime, Utc};
use fleet_model::{
    CoreError, CoreResult, Cursor, Lock, LockPurpose, LockStatus, Mailbox, MailboxId, Message,
    MessagePriority, MessageStatus, Mission, MissionId, MissionStatus, Priority, Specialist,
    SpecialistId, SpecialistStatus, Sortie, SortieId, SortieStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

fn parse_priority(raw: &str) -> CoreResult<Priority> {
    match raw {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(CoreError::corruption(format!("unrecognized priority {other:?}"))),
    }
}

fn parse_mission_status(raw: &str) -> CoreResult<MissionStatus> {
    match raw {
        "pending" => Ok(MissionStatus::Pending),
        "in_progress" => Ok(MissionStatus::InProgress),
        "review" => Ok(MissionStatus::Review),
        "completed" => Ok(MissionStatus::Completed),
        "cancelled" => Ok(MissionStatus::Cancelled),
        other => Err(CoreError::corruption(format!("unrecognized mission status {other:?}"))),
    }
}

fn parse_sortie_status(raw: &str) -> CoreResult<SortieStatus> {
    match raw {
        "pending" => Ok(SortieStatus::Pending),
        "assigned" => Ok(SortieStatus::Assigned),
        "in_progress" => Ok(SortieStatus::InProgress),
        "blocked" => Ok(SortieStatus::Blocked),
        "review" => Ok(SortieStatus::Review),
        "completed" => Ok(SortieStatus::Completed),
        "failed" => Ok(SortieStatus::Failed),
        "cancelled" => Ok(SortieStatus::Cancelled),
        other => Err(CoreError::corruption(format!("unrecognized sortie status {other:?}"))),
    }
}

fn parse_specialist_status(raw: &str) -> CoreResult<SpecialistStatus> {
    match raw {
        "active" => Ok(SpecialistStatus::Active),
        "busy" => Ok(SpecialistStatus::Busy),
        "idle" => Ok(SpecialistStatus::Idle),
        "inactive" => Ok(SpecialistStatus::Inactive),
        "completed" => Ok(SpecialistStatus::Completed),
        other => Err(CoreError::corruption(format!("unrecognized specialist status {other:?}"))),
    }
}

fn parse_lock_purpose(raw: &str) -> CoreResult<LockPurpose> {
    match raw {
        "edit" => Ok(LockPurpose::Edit),
        "read" => Ok(LockPurpose::Read),
        "delete" => Ok(LockPurpose::Delete),
        other => Err(CoreError::corruption(format!("unrecognized lock purpose {other:?}"))),
    }
}

fn parse_lock_status(raw: &str) -> CoreResult<LockStatus> {
    match raw {
        "active" => Ok(LockStatus::Active),
        "released" => Ok(LockStatus::Released),
        "expired" => Ok(LockStatus::Expired),
        "force_released" => Ok(LockStatus::ForceReleased),
        other => Err(CoreError::corruption(format!("unrecognized lock status {other:?}"))),
    }
}

fn parse_message_status(raw: &str) -> CoreResult<MessageStatus> {
    match raw {
        "pending" => Ok(MessageStatus::Pending),
        "read" => Ok(MessageStatus::Read),
        "acked" => Ok(MessageStatus::Acked),
        other => Err(CoreError::corruption(format!("unrecognized message status {other:?}"))),
    }
}

fn parse_message_priority(raw: &str) -> CoreResult<MessagePriority> {
    match raw {
        "low" => Ok(MessagePriority::Low),
        "normal" => Ok(MessagePriority::Normal),
        "high" => Ok(MessagePriority::High),
        "urgent" => Ok(MessagePriority::Urgent),
        other => Err(CoreError::corruption(format!("unrecognized message priority {other:?}"))),
    }
}

fn mission_status_str(status: MissionStatus) -> &'static str {
    match status {
        MissionStatus::Pending => "pending",
        MissionStatus::InProgress => "in_progress",
        MissionStatus::Review => "review",
        MissionStatus::Completed => "completed",
        MissionStatus::Cancelled => "cancelled",
    }
}

fn message_status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Read => "read",
        MessageStatus::Acked => "acked",
    }
}

fn col<T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &SqliteRow,
    name: &str,
) -> CoreResult<T> {
    row.try_get(name).map_err(|e| CoreError::internal(format!("column {name}: {e}")))
}

fn row_to_mission(row: &SqliteRow) -> CoreResult<Mission> {
    let id: String = col(row, "id")?;
    let result_raw: Option<String> = col(row, "result")?;
    let metadata_raw: String = col(row, "metadata")?;
    Ok(Mission {
        id: MissionId::parse(id)?,
        title: col(row, "title")?,
        description: col(row, "description")?,
        status: parse_mission_status(&col::<String>(row, "status")?)?,
        priority: parse_priority(&col::<String>(row, "priority")?)?,
        created_at: fleet_store::get_datetime(row, "created_at")?,
        started_at: fleet_store::get_optional_datetime(row, "started_at")?,
        completed_at: fleet_store::get_optional_datetime(row, "completed_at")?,
        total_sorties: col(row, "total_sorties")?,
        completed_sorties: col(row, "completed_sorties")?,
        result: result_raw
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| CoreError::corruption(format!("mission result not JSON: {e}")))?,
        metadata: serde_json::from_str(&metadata_raw)
            .map_err(|e| CoreError::corruption(format!("mission metadata not JSON: {e}")))?,
    })
}

fn row_to_sortie(row: &SqliteRow) -> CoreResult<Sortie> {
    let id: String = col(row, "id")?;
    let mission_id: Option<String> = col(row, "mission_id")?;
    let assigned_to: Option<String> = col(row, "assigned_to")?;
    let result_raw: Option<String> = col(row, "result")?;
    let metadata_raw: String = col(row, "metadata")?;
    let files_raw: String = col(row, "files")?;
    Ok(Sortie {
        id: SortieId::parse(id)?,
        mission_id: mission_id.map(MissionId::parse).transpose()?,
        title: col(row, "title")?,
        description: col(row, "description")?,
        status: parse_sortie_status(&col::<String>(row, "status")?)?,
        priority: parse_priority(&col::<String>(row, "priority")?)?,
        assigned_to: assigned_to.map(SpecialistId::parse).transpose()?,
        created_at: fleet_store::get_datetime(row, "created_at")?,
        started_at: fleet_store::get_optional_datetime(row, "started_at")?,
        completed_at: fleet_store::get_optional_datetime(row, "completed_at")?,
        progress: col(row, "progress")?,
        progress_notes: col(row, "progress_notes")?,
        blocked_by: col(row, "blocked_by")?,
        blocked_reason: col(row, "blocked_reason")?,
        files: serde_json::from_str(&files_raw)
            .map_err(|e| CoreError::corruption(format!("sortie files not JSON: {e}")))?,
        result: result_raw
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| CoreError::corruption(format!("sortie result not JSON: {e}")))?,
        metadata: serde_json::from_str(&metadata_raw)
            .map_err(|e| CoreError::corruption(format!("sortie metadata not JSON: {e}")))?,
    })
}

fn row_to_specialist(row: &SqliteRow) -> CoreResult<Specialist> {
    let id: String = col(row, "id")?;
    let current_sortie: Option<String> = col(row, "current_sortie")?;
    let capabilities_raw: String = col(row, "capabilities")?;
    Ok(Specialist {
        id: SpecialistId::parse(id)?,
        name: col(row, "name")?,
        status: parse_specialist_status(&col::<String>(row, "status")?)?,
        capabilities: serde_json::from_str(&capabilities_raw)
            .map_err(|e| CoreError::corruption(format!("specialist capabilities not JSON: {e}")))?,
        registered_at: fleet_store::get_datetime(row, "registered_at")?,
        last_seen: fleet_store::get_datetime(row, "last_seen")?,
        current_sortie: current_sortie.map(SortieId::parse).transpose()?,
    })
}

fn row_to_lock(row: &SqliteRow) -> CoreResult<Lock> {
    let id: String = col(row, "id")?;
    let reserved_by: String = col(row, "reserved_by")?;
    Ok(Lock {
        id: fleet_model::LockId::parse(id)?,
        file: col(row, "file")?,
        normalized_path: col(row, "normalized_path")?,
        reserved_by: SpecialistId::parse(reserved_by)?,
        reserved_at: fleet_store::get_datetime(row, "reserved_at")?,
        released_at: fleet_store::get_optional_datetime(row, "released_at")?,
        expires_at: fleet_store::get_datetime(row, "expires_at")?,
        purpose: parse_lock_purpose(&col::<String>(row, "purpose")?)?,
        checksum: col(row, "checksum")?,
        status: parse_lock_status(&col::<String>(row, "status")?)?,
    })
}

fn row_to_message(row: &SqliteRow) -> CoreResult<Message> {
    let id: String = col(row, "id")?;
    let mailbox_id: String = col(row, "mailbox_id")?;
    let sender_id: Option<String> = col(row, "sender_id")?;
    let causation_id: Option<String> = col(row, "causation_id")?;
    let content_raw: String = col(row, "content")?;
    Ok(Message {
        id: fleet_model::MessageId::parse(id)?,
        mailbox_id: MailboxId::parse(mailbox_id)?,
        sender_id: sender_id.map(SpecialistId::parse).transpose()?,
        thread_id: col(row, "thread_id")?,
        message_type: col(row, "message_type")?,
        content: serde_json::from_str(&content_raw)
            .map_err(|e| CoreError::corruption(format!("message content not JSON: {e}")))?,
        status: parse_message_status(&col::<String>(row, "status")?)?,
        priority: parse_message_priority(&col::<String>(row, "priority")?)?,
        sent_at: fleet_store::get_datetime(row, "sent_at")?,
        read_at: fleet_store::get_optional_datetime(row, "read_at")?,
        acked_at: fleet_store::get_optional_datetime(row, "acked_at")?,
        causation_id: causation_id.map(fleet_model::EventId::parse).transpose()?,
    })
}

fn row_to_cursor(row: &SqliteRow) -> CoreResult<Cursor> {
    Ok(Cursor {
        id: col(row, "id")?,
        stream_type: col(row, "stream_type")?,
        stream_id: col(row, "stream_id")?,
        position: col(row, "position")?,
        consumer_id: col(row, "consumer_id")?,
        created_at: fleet_store::get_datetime(row, "created_at")?,
        updated_at: fleet_store::get_datetime(row, "updated_at")?,
    })
}

fn row_to_mailbox(row: &SqliteRow) -> CoreResult<Mailbox> {
    let mailbox_id: String = col(row, "mailbox_id")?;
    let owner_id: String = col(row, "owner_id")?;
    Ok(Mailbox {
        mailbox_id: MailboxId::parse(mailbox_id)?,
        owner_id: SpecialistId::parse(owner_id)?,
        created_at: fleet_store::get_datetime(row, "created_at")?,
    })
}

pub async fn get_mission(pool: &SqlitePool, id: &MissionId) -> CoreResult<Option<Mission>> {
    let row = sqlx::query("SELECT * FROM missions WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_mission: {e}")))?;
    row.as_ref().map(row_to_mission).transpose()
}

pub async fn list_missions(
    pool: &SqlitePool,
    status: Option<MissionStatus>,
    limit: i64,
    offset: i64,
) -> CoreResult<Vec<Mission>> {
    let rows = match status {
        Some(status) => {
            sqlx::query("SELECT * FROM missions WHERE status = ? ORDER BY created_at ASC LIMIT ? OFFSET ?")
                .bind(mission_status_str(status))
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query("SELECT * FROM missions ORDER BY created_at ASC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await
        }
    }
    .map_err(|e| CoreError::internal(format!("list_missions: {e}")))?;
    rows.iter().map(row_to_mission).collect()
}

/// Transaction-scoped variant of [`get_mission`], used by
/// `fleet-checkpoint::create` so the mission row is read from the same
/// snapshot as the sorties/locks/messages it's checkpointed alongside.
pub async fn get_mission_in_tx(tx: &mut Transaction<'static, Sqlite>, id: &MissionId) -> CoreResult<Option<Mission>> {
    let row = sqlx::query("SELECT * FROM missions WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("get_mission_in_tx: {e}")))?;
    row.as_ref().map(row_to_mission).transpose()
}

pub async fn get_sortie(pool: &SqlitePool, id: &SortieId) -> CoreResult<Option<Sortie>> {
    let row = sqlx::query("SELECT * FROM sorties WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_sortie: {e}")))?;
    row.as_ref().map(row_to_sortie).transpose()
}

/// Transaction-scoped variant of [`get_sortie`], used by
/// `fleet-recovery::restore` so the current row it diffs against is read
/// from the same transaction the converging events are appended into.
pub async fn get_sortie_in_tx(tx: &mut Transaction<'static, Sqlite>, id: &SortieId) -> CoreResult<Option<Sortie>> {
    let row = sqlx::query("SELECT * FROM sorties WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("get_sortie_in_tx: {e}")))?;
    row.as_ref().map(row_to_sortie).transpose()
}

pub async fn list_sorties_by_mission(pool: &SqlitePool, mission_id: &MissionId) -> CoreResult<Vec<Sortie>> {
    let rows = sqlx::query("SELECT * FROM sorties WHERE mission_id = ? ORDER BY created_at ASC")
        .bind(mission_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_sorties_by_mission: {e}")))?;
    rows.iter().map(row_to_sortie).collect()
}

/// Transaction-scoped variant of [`list_sorties_by_mission`], used by
/// `fleet-checkpoint::create`.
pub async fn list_sorties_by_mission_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    mission_id: &MissionId,
) -> CoreResult<Vec<Sortie>> {
    let rows = sqlx::query("SELECT * FROM sorties WHERE mission_id = ? ORDER BY created_at ASC")
        .bind(mission_id.as_str())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("list_sorties_by_mission_in_tx: {e}")))?;
    rows.iter().map(row_to_sortie).collect()
}

pub async fn list_sorties_by_specialist(
    pool: &SqlitePool,
    specialist_id: &SpecialistId,
) -> CoreResult<Vec<Sortie>> {
    let rows = sqlx::query("SELECT * FROM sorties WHERE assigned_to = ? ORDER BY created_at ASC")
        .bind(specialist_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_sorties_by_specialist: {e}")))?;
    rows.iter().map(row_to_sortie).collect()
}

pub async fn get_specialist(pool: &SqlitePool, id: &SpecialistId) -> CoreResult<Option<Specialist>> {
    let row = sqlx::query("SELECT * FROM specialists WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_specialist: {e}")))?;
    row.as_ref().map(row_to_specialist).transpose()
}

pub async fn list_specialists(pool: &SqlitePool) -> CoreResult<Vec<Specialist>> {
    let rows = sqlx::query("SELECT * FROM specialists ORDER BY registered_at ASC")
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_specialists: {e}")))?;
    rows.iter().map(row_to_specialist).collect()
}

pub async fn get_lock(pool: &SqlitePool, id: &fleet_model::LockId) -> CoreResult<Option<Lock>> {
    let row = sqlx::query("SELECT * FROM locks WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_lock: {e}")))?;
    row.as_ref().map(row_to_lock).transpose()
}

/// The single active (status='active' AND not yet past `expires_at`) lock
/// on `normalized_path`, if any.
pub async fn get_active_lock_by_path(
    pool: &SqlitePool,
    normalized_path: &str,
    now: DateTime<Utc>,
) -> CoreResult<Option<Lock>> {
    let row = sqlx::query(
        "SELECT * FROM locks WHERE normalized_path = ? AND status = 'active' AND expires_at > ? \
         ORDER BY reserved_at DESC LIMIT 1",
    )
    .bind(normalized_path)
    .bind(now.to_rfc3339())
    .fetch_optional(pool)
    .await
    .map_err(|e| CoreError::internal(format!("get_active_lock_by_path: {e}")))?;
    row.as_ref().map(row_to_lock).transpose()
}

pub async fn list_locks_by_file(pool: &SqlitePool, normalized_path: &str) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE normalized_path = ? ORDER BY reserved_at ASC")
        .bind(normalized_path)
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_locks_by_file: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

pub async fn list_locks_by_specialist(
    pool: &SqlitePool,
    specialist_id: &SpecialistId,
) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE reserved_by = ? ORDER BY reserved_at ASC")
        .bind(specialist_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_locks_by_specialist: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

/// Transaction-scoped variant of [`list_locks_by_specialist`], used by
/// `fleet-recovery::restore` to find locks a checkpointed specialist holds
/// outside the checkpoint's snapshot, within the same write transaction the
/// force-releases are appended into.
pub async fn list_locks_by_specialist_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    specialist_id: &SpecialistId,
) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE reserved_by = ? ORDER BY reserved_at ASC")
        .bind(specialist_id.as_str())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("list_locks_by_specialist_in_tx: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

pub async fn list_active_locks(pool: &SqlitePool) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE status = 'active' ORDER BY reserved_at ASC")
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_active_locks: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

/// Transaction-scoped variant of [`list_active_locks`], used by
/// `fleet-checkpoint::create`.
pub async fn list_active_locks_in_tx(tx: &mut Transaction<'static, Sqlite>) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE status = 'active' ORDER BY reserved_at ASC")
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("list_active_locks_in_tx: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

/// Locks whose status is still `active` in the projection but whose
/// `expires_at` has already passed — candidates for the sweeper.
pub async fn list_expired_locks(pool: &SqlitePool, now: DateTime<Utc>) -> CoreResult<Vec<Lock>> {
    let rows = sqlx::query("SELECT * FROM locks WHERE status = 'active' AND expires_at <= ? ORDER BY expires_at ASC")
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::internal(format!("list_expired_locks: {e}")))?;
    rows.iter().map(row_to_lock).collect()
}

/// Transaction-scoped variant of [`get_lock`], for command crates that
/// must read-then-write the same row atomically.
pub async fn get_lock_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    id: &fleet_model::LockId,
) -> CoreResult<Option<Lock>> {
    let row = sqlx::query("SELECT * FROM locks WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("get_lock_in_tx: {e}")))?;
    row.as_ref().map(row_to_lock).transpose()
}

/// Transaction-scoped variant of [`get_active_lock_by_path`], used by
/// `fleet-locks::acquire` so the conflict check and the insert happen
/// atomically in one write transaction.
pub async fn get_active_lock_by_path_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    normalized_path: &str,
    now: DateTime<Utc>,
) -> CoreResult<Option<Lock>> {
    let row = sqlx::query(
        "SELECT * FROM locks WHERE normalized_path = ? AND status = 'active' AND expires_at > ? \
         ORDER BY reserved_at DESC LIMIT 1",
    )
    .bind(normalized_path)
    .bind(now.to_rfc3339())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| CoreError::internal(format!("get_active_lock_by_path_in_tx: {e}")))?;
    row.as_ref().map(row_to_lock).transpose()
}

pub async fn get_mailbox(pool: &SqlitePool, id: &MailboxId) -> CoreResult<Option<Mailbox>> {
    let row = sqlx::query("SELECT * FROM mailboxes WHERE mailbox_id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_mailbox: {e}")))?;
    row.as_ref().map(row_to_mailbox).transpose()
}

pub async fn get_mailbox_by_owner(pool: &SqlitePool, owner_id: &SpecialistId) -> CoreResult<Option<Mailbox>> {
    let row = sqlx::query("SELECT * FROM mailboxes WHERE owner_id = ?")
        .bind(owner_id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_mailbox_by_owner: {e}")))?;
    row.as_ref().map(row_to_mailbox).transpose()
}

/// Transaction-scoped lookup of the mailbox owned by `owner_id`, used by
/// `fleet-mailbox::send` to decide whether a mailbox must be auto-created.
pub async fn get_mailbox_by_owner_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    owner_id: &SpecialistId,
) -> CoreResult<Option<Mailbox>> {
    let row = sqlx::query("SELECT * FROM mailboxes WHERE owner_id = ?")
        .bind(owner_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("get_mailbox_by_owner_in_tx: {e}")))?;
    row.as_ref().map(row_to_mailbox).transpose()
}

/// Transaction-scoped variant of [`get_message`], for `mark_read` /
/// `acknowledge` / `requeue`'s idempotency checks.
pub async fn get_message_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    id: &fleet_model::MessageId,
) -> CoreResult<Option<Message>> {
    let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::internal(format!("get_message_in_tx: {e}")))?;
    row.as_ref().map(row_to_message).transpose()
}

pub async fn get_message(pool: &SqlitePool, id: &fleet_model::MessageId) -> CoreResult<Option<Message>> {
    let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_message: {e}")))?;
    row.as_ref().map(row_to_message).transpose()
}

/// Messages for a mailbox, oldest first, tiebroken by `insertion_id`.
/// `status` filters to one lifecycle stage when given.
pub async fn list_messages(
    pool: &SqlitePool,
    mailbox_id: &MailboxId,
    status: Option<MessageStatus>,
) -> CoreResult<Vec<Message>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(
                "SELECT * FROM messages WHERE mailbox_id = ? AND status = ? ORDER BY sent_at ASC, insertion_id ASC",
            )
            .bind(mailbox_id.as_str())
            .bind(message_status_str(status))
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query("SELECT * FROM messages WHERE mailbox_id = ? ORDER BY sent_at ASC, insertion_id ASC")
                .bind(mailbox_id.as_str())
                .fetch_all(pool)
                .await
        }
    }
    .map_err(|e| CoreError::internal(format!("list_messages: {e}")))?;
    rows.iter().map(row_to_message).collect()
}

/// Transaction-scoped variant of [`list_messages`], used by
/// `fleet-checkpoint::create`.
pub async fn list_messages_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    mailbox_id: &MailboxId,
    status: Option<MessageStatus>,
) -> CoreResult<Vec<Message>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(
                "SELECT * FROM messages WHERE mailbox_id = ? AND status = ? ORDER BY sent_at ASC, insertion_id ASC",
            )
            .bind(mailbox_id.as_str())
            .bind(message_status_str(status))
            .fetch_all(&mut **tx)
            .await
        }
        None => {
            sqlx::query("SELECT * FROM messages WHERE mailbox_id = ? ORDER BY sent_at ASC, insertion_id ASC")
                .bind(mailbox_id.as_str())
                .fetch_all(&mut **tx)
                .await
        }
    }
    .map_err(|e| CoreError::internal(format!("list_messages_in_tx: {e}")))?;
    rows.iter().map(row_to_message).collect()
}

pub async fn get_cursor(pool: &SqlitePool, id: &str) -> CoreResult<Option<Cursor>> {
    let row = sqlx::query("SELECT * FROM cursors WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| CoreError::internal(format!("get_cursor: {e}")))?;
    row.as_ref().map(row_to_cursor).transpose()
}
