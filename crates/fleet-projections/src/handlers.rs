//! Per-`event_type` projection handlers dispatched from [`crate::apply`].
//!
//! Each handler reads whatever fields it needs out of `event.data` and
//! performs exactly one row insert/update against the caller's open write
//! transaction. Handlers never read back the row they just wrote — the
//! Event Log's append order is the only input they need.

use chrono::{DateTime, Utc};
use fleet_model::{CoreError, CoreResult, Event};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

type Tx<'a> = Transaction<'a, Sqlite>;

fn field<'a>(data: &'a Value, key: &str) -> CoreResult<&'a Value> {
    data.get(key)
        .ok_or_else(|| CoreError::corruption(format!("event data missing field {key:?}")))
}

fn field_str(data: &Value, key: &str) -> CoreResult<String> {
    field(data, key)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| CoreError::corruption(format!("event field {key:?} is not a string")))
}

fn field_opt_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn field_i64(data: &Value, key: &str) -> CoreResult<i64> {
    field(data, key)?
        .as_i64()
        .ok_or_else(|| CoreError::corruption(format!("event field {key:?} is not an integer")))
}

fn field_datetime(data: &Value, key: &str) -> CoreResult<DateTime<Utc>> {
    let raw = field_str(data, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::corruption(format!("event field {key:?} is not RFC3339: {e}")))
}

fn json_text(value: &Value) -> String {
    value.to_string()
}

// ---------------------------------------------------------------- missions

pub(crate) async fn mission_created(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let title = field_str(&event.data, "title")?;
    let description = field_opt_str(&event.data, "description");
    let priority = field_str(&event.data, "priority")?;
    let metadata = event.data.get("metadata").cloned().unwrap_or(Value::Object(Default::default()));

    sqlx::query(
        "INSERT INTO missions (id, title, description, status, priority, created_at, total_sorties, completed_sorties, metadata) \
         VALUES (?, ?, ?, 'pending', ?, ?, 0, 0, ?)",
    )
    .bind(&event.stream_id)
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(event.recorded_at.to_rfc3339())
    .bind(json_text(&metadata))
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("insert mission: {e}")))?;
    Ok(())
}

pub(crate) async fn mission_status(
    tx: &mut Tx<'_>,
    event: &Event,
    status: &str,
    timestamp_column: Option<&str>,
) -> CoreResult<()> {
    if let Some(column) = timestamp_column {
        sqlx::query(&format!("UPDATE missions SET status = ?, {column} = ? WHERE id = ?"))
            .bind(status)
            .bind(event.recorded_at.to_rfc3339())
            .bind(&event.stream_id)
            .execute(&mut *tx)
            .await
    } else {
        sqlx::query("UPDATE missions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(&event.stream_id)
            .execute(&mut *tx)
            .await
    }
    .map_err(|e| CoreError::internal(format!("update mission status: {e}")))?;
    Ok(())
}

pub(crate) async fn mission_completed(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let result = event.data.get("result").cloned();
    sqlx::query("UPDATE missions SET status = 'completed', completed_at = ?, result = ? WHERE id = ?")
        .bind(event.recorded_at.to_rfc3339())
        .bind(result.map(|r| json_text(&r)))
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("complete mission: {e}")))?;
    Ok(())
}

// ----------------------------------------------------------------- sorties

pub(crate) async fn sortie_created(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let mission_id = field_opt_str(&event.data, "mission_id");
    let title = field_str(&event.data, "title")?;
    let description = field_opt_str(&event.data, "description");
    let priority = field_str(&event.data, "priority")?;
    let files = event.data.get("files").cloned().unwrap_or(Value::Array(vec![]));
    let metadata = event.data.get("metadata").cloned().unwrap_or(Value::Object(Default::default()));

    sqlx::query(
        "INSERT INTO sorties (id, mission_id, title, description, status, priority, created_at, progress, files, metadata) \
         VALUES (?, ?, ?, ?, 'pending', ?, ?, 0, ?, ?)",
    )
    .bind(&event.stream_id)
    .bind(&mission_id)
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(event.recorded_at.to_rfc3339())
    .bind(json_text(&files))
    .bind(json_text(&metadata))
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("insert sortie: {e}")))?;

    if let Some(mission_id) = mission_id {
        sqlx::query("UPDATE missions SET total_sorties = total_sorties + 1 WHERE id = ?")
            .bind(mission_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::internal(format!("bump mission total_sorties: {e}")))?;
    }
    Ok(())
}

pub(crate) async fn sortie_assigned(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let specialist_id = field_str(&event.data, "specialist_id")?;

    sqlx::query("UPDATE sorties SET status = 'assigned', assigned_to = ? WHERE id = ?")
        .bind(&specialist_id)
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("assign sortie: {e}")))?;

    sqlx::query("UPDATE specialists SET status = 'busy', current_sortie = ? WHERE id = ?")
        .bind(&event.stream_id)
        .bind(specialist_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("mark specialist busy: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_started(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    sqlx::query("UPDATE sorties SET status = 'in_progress', started_at = ? WHERE id = ?")
        .bind(event.recorded_at.to_rfc3339())
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("start sortie: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_progress(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let progress = field_i64(&event.data, "progress")?;
    let notes = field_opt_str(&event.data, "notes");

    sqlx::query("UPDATE sorties SET progress = ?, progress_notes = ? WHERE id = ?")
        .bind(progress)
        .bind(notes)
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("update sortie progress: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_blocked(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let blocked_by = field_opt_str(&event.data, "blocked_by");
    let reason = field_opt_str(&event.data, "reason");

    sqlx::query("UPDATE sorties SET status = 'blocked', blocked_by = ?, blocked_reason = ? WHERE id = ?")
        .bind(blocked_by)
        .bind(reason)
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("block sortie: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_unblocked(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    sqlx::query(
        "UPDATE sorties SET status = 'in_progress', blocked_by = NULL, blocked_reason = NULL WHERE id = ?",
    )
    .bind(&event.stream_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("unblock sortie: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_simple_status(tx: &mut Tx<'_>, event: &Event, status: &str) -> CoreResult<()> {
    sqlx::query("UPDATE sorties SET status = ? WHERE id = ?")
        .bind(status)
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("update sortie status: {e}")))?;
    Ok(())
}

pub(crate) async fn sortie_completed(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let result = event.data.get("result").cloned();

    let mission_id: Option<String> = sqlx::query_scalar("SELECT mission_id FROM sorties WHERE id = ?")
        .bind(&event.stream_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("lookup sortie mission: {e}")))?;

    sqlx::query("UPDATE sorties SET status = 'completed', completed_at = ?, progress = 100, result = ? WHERE id = ?")
        .bind(event.recorded_at.to_rfc3339())
        .bind(result.map(|r| json_text(&r)))
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("complete sortie: {e}")))?;

    if let Some(mission_id) = mission_id {
        sqlx::query("UPDATE missions SET completed_sorties = completed_sorties + 1 WHERE id = ?")
            .bind(mission_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::internal(format!("bump mission completed_sorties: {e}")))?;
    }
    Ok(())
}

pub(crate) async fn sortie_terminal(tx: &mut Tx<'_>, event: &Event, status: &str) -> CoreResult<()> {
    let result = event.data.get("result").cloned();
    sqlx::query("UPDATE sorties SET status = ?, completed_at = ?, result = ? WHERE id = ?")
        .bind(status)
        .bind(event.recorded_at.to_rfc3339())
        .bind(result.map(|r| json_text(&r)))
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("terminate sortie: {e}")))?;
    Ok(())
}

// ------------------------------------------------------------- specialists

pub(crate) async fn specialist_registered(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let name = field_str(&event.data, "name")?;
    let capabilities = event.data.get("capabilities").cloned().unwrap_or(Value::Array(vec![]));

    sqlx::query(
        "INSERT INTO specialists (id, name, status, capabilities, registered_at, last_seen) \
         VALUES (?, ?, 'active', ?, ?, ?)",
    )
    .bind(&event.stream_id)
    .bind(name)
    .bind(json_text(&capabilities))
    .bind(event.recorded_at.to_rfc3339())
    .bind(event.recorded_at.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("register specialist: {e}")))?;
    Ok(())
}

pub(crate) async fn specialist_heartbeat(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    sqlx::query("UPDATE specialists SET last_seen = ? WHERE id = ?")
        .bind(event.recorded_at.to_rfc3339())
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("heartbeat specialist: {e}")))?;
    Ok(())
}

pub(crate) async fn specialist_status_changed(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let status = field_str(&event.data, "status")?;
    sqlx::query("UPDATE specialists SET status = ? WHERE id = ?")
        .bind(status)
        .bind(&event.stream_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("change specialist status: {e}")))?;
    Ok(())
}

// ------------------------------------------------------------------ locks

pub(crate) async fn lock_acquired(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let lock_id = field_str(&event.data, "lock_id")?;
    let file = field_str(&event.data, "file")?;
    let reserved_by = field_str(&event.data, "reserved_by")?;
    let purpose = field_str(&event.data, "purpose")?;
    let checksum = field_opt_str(&event.data, "checksum");
    let expires_at = field_datetime(&event.data, "expires_at")?;

    sqlx::query(
        "INSERT INTO locks (id, file, normalized_path, reserved_by, reserved_at, expires_at, purpose, checksum, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active')",
    )
    .bind(lock_id)
    .bind(file)
    .bind(&event.stream_id)
    .bind(reserved_by)
    .bind(event.recorded_at.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .bind(purpose)
    .bind(checksum)
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("insert lock: {e}")))?;
    Ok(())
}

pub(crate) async fn lock_released(tx: &mut Tx<'_>, event: &Event, status: &str) -> CoreResult<()> {
    let lock_id = field_str(&event.data, "lock_id")?;
    sqlx::query("UPDATE locks SET status = ?, released_at = ? WHERE id = ?")
        .bind(status)
        .bind(event.recorded_at.to_rfc3339())
        .bind(lock_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("release lock: {e}")))?;
    Ok(())
}

pub(crate) async fn lock_extended(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let lock_id = field_str(&event.data, "lock_id")?;
    let expires_at = field_datetime(&event.data, "expires_at")?;
    sqlx::query("UPDATE locks SET expires_at = ? WHERE id = ?")
        .bind(expires_at.to_rfc3339())
        .bind(lock_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("extend lock: {e}")))?;
    Ok(())
}

// ------------------------------------------------------------- mail/queue

pub(crate) async fn message_sent(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let message_id = field_str(&event.data, "message_id")?;
    let sender_id = field_opt_str(&event.data, "sender_id");
    let thread_id = field_opt_str(&event.data, "thread_id");
    let message_type = field_str(&event.data, "message_type")?;
    let content = event.data.get("content").cloned().unwrap_or(Value::Null);
    let priority = field_str(&event.data, "priority")?;
    let owner_id = field_opt_str(&event.data, "mailbox_owner_id");

    sqlx::query(
        "INSERT INTO mailboxes (mailbox_id, owner_id, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(mailbox_id) DO NOTHING",
    )
    .bind(&event.stream_id)
    .bind(owner_id.unwrap_or_else(|| event.stream_id.clone()))
    .bind(event.recorded_at.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("upsert mailbox: {e}")))?;

    sqlx::query(
        "INSERT INTO messages (id, mailbox_id, sender_id, thread_id, message_type, content, status, priority, sent_at, causation_id) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
    )
    .bind(message_id)
    .bind(&event.stream_id)
    .bind(sender_id)
    .bind(thread_id)
    .bind(message_type)
    .bind(json_text(&content))
    .bind(priority)
    .bind(event.recorded_at.to_rfc3339())
    .bind(event.causation_id.as_ref().map(|id| id.as_str().to_owned()))
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::internal(format!("insert message: {e}")))?;
    Ok(())
}

pub(crate) async fn message_status(
    tx: &mut Tx<'_>,
    event: &Event,
    status: &str,
    timestamp_column: &str,
) -> CoreResult<()> {
    let message_id = field_str(&event.data, "message_id")?;
    sqlx::query(&format!("UPDATE messages SET status = ?, {timestamp_column} = ? WHERE id = ?"))
        .bind(status)
        .bind(event.recorded_at.to_rfc3339())
        .bind(message_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("update message status: {e}")))?;
    Ok(())
}

pub(crate) async fn message_requeued(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let message_id = field_str(&event.data, "message_id")?;
    sqlx::query("UPDATE messages SET status = 'pending', read_at = NULL, acked_at = NULL WHERE id = ?")
        .bind(message_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("requeue message: {e}")))?;
    Ok(())
}

// ----------------------------------------------------------------- cursors

pub(crate) async fn cursor_advanced(tx: &mut Tx<'_>, event: &Event) -> CoreResult<()> {
    let target_stream_type = field_str(&event.data, "target_stream_type")?;
    let target_stream_id = field_str(&event.data, "target_stream_id")?;
    let position = field_i64(&event.data, "position")?;
    let consumer_id = field_opt_str(&event.data, "consumer_id");

    let row = sqlx::query("SELECT position FROM cursors WHERE id = ?")
        .bind(&event.stream_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("lookup cursor: {e}")))?;

    if row.is_some() {
        sqlx::query("UPDATE cursors SET position = ?, consumer_id = ?, updated_at = ? WHERE id = ?")
            .bind(position)
            .bind(consumer_id)
            .bind(event.recorded_at.to_rfc3339())
            .bind(&event.stream_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::internal(format!("advance cursor: {e}")))?;
    } else {
        sqlx::query(
            "INSERT INTO cursors (id, stream_type, stream_id, position, consumer_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.stream_id)
        .bind(target_stream_type)
        .bind(target_stream_id)
        .bind(position)
        .bind(consumer_id)
        .bind(event.recorded_at.to_rfc3339())
        .bind(event.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::internal(format!("create cursor: {e}")))?;
    }
    Ok(())
}
