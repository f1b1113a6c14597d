//! The Projections registry — the event_type -> row-update
//! dispatch table for missions, sorties, specialists, locks, mailboxes,
//! messages, and cursors, plus the read-only query methods every higher
//! layer uses instead of touching SQL directly.
//!
//! Each handler derives a row update purely from the event it's given;
//! an unrecognized `event_type` is logged and skipped rather than treated
//! as an error, so older projections stay forward-compatible with newer
//! event types.
//!
//! `apply` is a free function, not a method on a handle, because it must be
//! callable from inside a write transaction a command-handling crate
//! (`fleet-locks`, `fleet-mailbox`, ...) already owns — bare pool-taking
//! functions rather than a stateful client object.

pub mod ledger;
pub mod queries;

pub use ledger::Ledger;

use fleet_model::{CoreError, CoreResult, Event};
use sqlx::{Sqlite, Transaction};
use tracing::warn;

const PROJECTION_NAME: &str = "core";
const PROJECTION_VERSION: i64 = 1;

/// Dispatch one event to its projection handler, inside the caller's
/// transaction. Unknown `event_type`s are logged and ignored.
pub async fn apply(tx: &mut Transaction<'static, Sqlite>, event: &Event) -> CoreResult<()> {
    match event.event_type.as_str() {
        "mission_created" => handlers::mission_created(tx, event).await,
        "mission_started" => handlers::mission_status(tx, event, "in_progress", Some("started_at")).await,
        "mission_review" => handlers::mission_status(tx, event, "review", None).await,
        "mission_completed" => handlers::mission_completed(tx, event).await,
        "mission_cancelled" => handlers::mission_status(tx, event, "cancelled", None).await,

        "sortie_created" => handlers::sortie_created(tx, event).await,
        "sortie_assigned" => handlers::sortie_assigned(tx, event).await,
        "sortie_started" => handlers::sortie_started(tx, event).await,
        "sortie_progress" => handlers::sortie_progress(tx, event).await,
        "sortie_blocked" => handlers::sortie_blocked(tx, event).await,
        "sortie_unblocked" => handlers::sortie_unblocked(tx, event).await,
        "sortie_review" => handlers::sortie_simple_status(tx, event, "review").await,
        "sortie_completed" => handlers::sortie_completed(tx, event).await,
        "sortie_failed" => handlers::sortie_terminal(tx, event, "failed").await,
        "sortie_cancelled" => handlers::sortie_terminal(tx, event, "cancelled").await,

        "specialist_registered" => handlers::specialist_registered(tx, event).await,
        "specialist_heartbeat" => handlers::specialist_heartbeat(tx, event).await,
        "specialist_status_changed" => handlers::specialist_status_changed(tx, event).await,

        "lock_acquired" => handlers::lock_acquired(tx, event).await,
        "lock_released" => handlers::lock_released(tx, event, "released").await,
        "lock_force_released" => handlers::lock_released(tx, event, "force_released").await,
        "lock_expired" => handlers::lock_released(tx, event, "expired").await,
        "lock_extended" => handlers::lock_extended(tx, event).await,

        "message_sent" => handlers::message_sent(tx, event).await,
        "message_read" => handlers::message_status(tx, event, "read", "read_at").await,
        "message_acked" => handlers::message_status(tx, event, "acked", "acked_at").await,
        "message_requeued" => handlers::message_requeued(tx, event).await,

        "cursor_advanced" => handlers::cursor_advanced(tx, event).await,

        // Checkpoints are written directly to the `checkpoints` table by
        // `fleet-checkpoint` in the same write transaction as the event
        // append; there is no generic row derivation
        // to perform here.
        "checkpoint_created" | "checkpoint_consumed" => Ok(()),

        other => {
            warn!(event_type = other, event_id = %event.event_id, "unknown event_type, ignoring");
            Ok(())
        }
    }
}

/// If the projection tables are empty or `projection_meta` is stale,
/// truncate and replay every event in `sequence_number`/global order to
/// rebuild them. Safe because every handler in `apply` is
/// idempotent given the same event exactly once.
pub async fn rebuild_if_needed(store: &fleet_store::Store) -> CoreResult<()> {
    let mut write = store.begin_write().await?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM projection_meta WHERE name = ?")
            .bind(PROJECTION_NAME)
            .fetch_optional(&mut *write.tx)
            .await
            .map_err(|e| CoreError::internal(format!("read projection_meta: {e}")))?;

    if current_version == Some(PROJECTION_VERSION) {
        write.rollback().await?;
        return Ok(());
    }

    for table in [
        "missions", "sorties", "specialists", "locks", "mailboxes", "messages", "cursors",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *write.tx)
            .await
            .map_err(|e| CoreError::internal(format!("truncate {table}: {e}")))?;
    }

    let rows = sqlx::query("SELECT event_id FROM events ORDER BY global_seq ASC")
        .fetch_all(&mut *write.tx)
        .await
        .map_err(|e| CoreError::internal(format!("list events for replay: {e}")))?;

    use sqlx::Row;
    let event_ids: Vec<String> = rows
        .iter()
        .map(|r| r.try_get::<String, _>("event_id"))
        .collect::<Result<_, _>>()
        .map_err(|e| CoreError::internal(format!("event_id column: {e}")))?;

    for event_id in event_ids {
        let row = sqlx::query("SELECT * FROM events WHERE event_id = ?")
            .bind(&event_id)
            .fetch_one(&mut *write.tx)
            .await
            .map_err(|e| CoreError::internal(format!("reload event {event_id}: {e}")))?;
        let event = row_to_event(&row)?;
        apply(&mut write.tx, &event).await?;
    }

    sqlx::query(
        "INSERT INTO projection_meta (name, version) VALUES (?, ?) \
         ON CONFLICT(name) DO UPDATE SET version = excluded.version",
    )
    .bind(PROJECTION_NAME)
    .bind(PROJECTION_VERSION)
    .execute(&mut *write.tx)
    .await
    .map_err(|e| CoreError::internal(format!("write projection_meta: {e}")))?;

    write.commit().await?;
    store.note_write_committed();
    Ok(())
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Event> {
    use fleet_model::EventId;
    use sqlx::Row;

    let data_raw: String = row.try_get("data").map_err(|e| CoreError::internal(e.to_string()))?;
    let stream_type_raw: String = row
        .try_get("stream_type")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let causation_raw: Option<String> = row
        .try_get("causation_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let correlation_raw: String = row
        .try_get("correlation_id")
        .map_err(|e| CoreError::internal(e.to_string()))?;
    let event_id_raw: String = row.try_get("event_id").map_err(|e| CoreError::internal(e.to_string()))?;

    Ok(Event {
        event_id: EventId::parse(event_id_raw)?,
        sequence_number: row
            .try_get("sequence_number")
            .map_err(|e| CoreError::internal(e.to_string()))?,
        event_type: row.try_get("event_type").map_err(|e| CoreError::internal(e.to_string()))?,
        stream_type: stream_type_raw.parse()?,
        stream_id: row.try_get("stream_id").map_err(|e| CoreError::internal(e.to_string()))?,
        data: serde_json::from_str(&data_raw)
            .map_err(|e| CoreError::corruption(format!("event data is not valid JSON: {e}")))?,
        causation_id: causation_raw.map(EventId::parse).transpose()?,
        correlation_id: EventId::parse(correlation_raw)?,
        occurred_at: fleet_store::get_datetime(row, "occurred_at")?,
        recorded_at: fleet_store::get_datetime(row, "recorded_at")?,
        schema_version: row
            .try_get("schema_version")
            .map_err(|e| CoreError::internal(e.to_string()))?,
    })
}

mod handlers;
