//! The Event Log — `append`/`append_batch`, stream/type/
//! causation/correlation/after-sequence reads, and the per-stream sequence
//! assignment algorithm.
//!
//! Inserts are insert-and-read-back, never a bare `INSERT` with no
//! returned row. Sequence assignment is a monotonic, non-decreasing
//! watermark per `(stream_type, stream_id)`: a race between two writers on
//! the same stream is caught by a uniqueness constraint, not by the
//! in-memory read of the current max.
//!
//! `append_in_tx` only inserts the event row — it does not touch projection
//! tables. Callers (starting with `fleet-projections::Ledger`) are
//! responsible for applying the event to projections inside the same
//! transaction before committing.

use chrono::Utc;
use fleet_model::{CoreError, CoreResult, Event, EventId, NewEvent, StreamType};
use sqlx::{Row, Sqlite, Transaction};

/// How many times `append_in_tx` retries the sequence-number race before
/// giving up. Under the Store's single-writer
/// lock this race cannot actually occur within one process, but the retry
/// loop is kept as the documented defensive behavior.
const MAX_SEQUENCE_RETRIES: u32 = 3;

/// Assign `sequence_number`, `event_id`, `correlation_id`, and
/// `recorded_at`, then insert the row. Must run inside a write transaction
/// already owned by the caller.
pub async fn append_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    input: NewEvent,
) -> CoreResult<Event> {
    validate_payload(&input)?;

    let mut attempt = 0;
    loop {
        let next_sequence = next_sequence_number(tx, input.stream_type, &input.stream_id).await?;
        let event_id = EventId::generate();
        let correlation_id = resolve_correlation_id(tx, &input, &event_id).await?;
        let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);
        let recorded_at = Utc::now();

        let insert = sqlx::query(
            r#"
            INSERT INTO events (
                event_id, sequence_number, event_type, stream_type, stream_id,
                data, causation_id, correlation_id, occurred_at, recorded_at, schema_version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event_id.as_str())
        .bind(next_sequence)
        .bind(&input.event_type)
        .bind(input.stream_type.as_str())
        .bind(&input.stream_id)
        .bind(input.data.to_string())
        .bind(input.causation_id.as_ref().map(|id| id.as_str()))
        .bind(correlation_id.as_str())
        .bind(occurred_at.to_rfc3339())
        .bind(recorded_at.to_rfc3339())
        .bind(input.schema_version)
        .execute(&mut **tx)
        .await;

        match insert {
            Ok(_) => {
                return Ok(Event {
                    event_id,
                    sequence_number: next_sequence,
                    event_type: input.event_type,
                    stream_type: input.stream_type,
                    stream_id: input.stream_id,
                    data: input.data,
                    causation_id: input.causation_id,
                    correlation_id,
                    occurred_at,
                    recorded_at,
                    schema_version: input.schema_version,
                });
            }
            Err(sqlx::Error::Database(db_err)) if is_unique_violation(&db_err) => {
                attempt += 1;
                if attempt >= MAX_SEQUENCE_RETRIES {
                    return Err(CoreError::corruption(format!(
                        "sequence race on stream ({:?}, {}) did not resolve after {attempt} retries",
                        input.stream_type, input.stream_id
                    )));
                }
                continue;
            }
            Err(e) => return Err(CoreError::transient(format!("event insert failed: {e}"))),
        }
    }
}

/// Convenience wrapper that owns its own transaction for callers that need
/// no projection side effects (e.g. tests). Production call sites go
/// through `fleet-projections::Ledger::append`, which applies projections
/// in the same transaction.
pub async fn append(store: &fleet_store::Store, input: NewEvent) -> CoreResult<Event> {
    fleet_store::retry_transient(|| async {
        let mut write = store.begin_write().await?;
        let event = append_in_tx(&mut write.tx, input.clone()).await?;
        write.commit().await?;
        store.note_write_committed();
        Ok(event)
    })
    .await
}

/// `AppendBatch([input]) -> [Event]`: atomic — every input is
/// appended inside one write transaction, and the transaction is only
/// committed if all of them succeed. A failure partway through rolls back
/// the whole batch rather than leaving a partial prefix persisted. No
/// projection side effects, same as `append`; production call sites go
/// through `fleet-projections::Ledger::append_batch`.
pub async fn append_batch(store: &fleet_store::Store, inputs: Vec<NewEvent>) -> CoreResult<Vec<Event>> {
    fleet_store::retry_transient(|| async {
        let mut write = store.begin_write().await?;
        let mut events = Vec::with_capacity(inputs.len());
        for input in inputs.iter().cloned() {
            events.push(append_in_tx(&mut write.tx, input).await?);
        }
        write.commit().await?;
        store.note_write_committed();
        Ok(events)
    })
    .await
}

fn is_unique_violation(db_err: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    db_err.code().as_deref() == Some("2067") || db_err.message().contains("UNIQUE constraint")
}

fn validate_payload(input: &NewEvent) -> CoreResult<()> {
    if input.event_type.trim().is_empty() {
        return Err(CoreError::validation("event_type must not be empty"));
    }
    if input.stream_id.trim().is_empty() {
        return Err(CoreError::validation("stream_id must not be empty"));
    }
    if !input.data.is_object() && !input.data.is_null() {
        return Err(CoreError::validation("event data payload must be a JSON object"));
    }
    Ok(())
}

/// `correlation_id = causation_id ? lookup(causation_id).correlation_id : event_id`
///. The lookup is deferred until here rather than in the
/// caller because only the Event Log knows how to resolve it against
/// already-persisted rows.
async fn resolve_correlation_id(
    tx: &mut Transaction<'static, Sqlite>,
    input: &NewEvent,
    event_id: &EventId,
) -> CoreResult<EventId> {
    if let Some(explicit) = &input.correlation_id {
        return Ok(explicit.clone());
    }
    let Some(causation_id) = &input.causation_id else {
        // Root event: correlation_id equals the event's own id.
        return Ok(event_id.clone());
    };

    let row = sqlx::query("SELECT correlation_id, recorded_at FROM events WHERE event_id = ?")
        .bind(causation_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoreError::transient(format!("causation lookup failed: {e}")))?;

    match row {
        Some(row) => {
            let correlation: String = row
                .try_get("correlation_id")
                .map_err(|e| CoreError::internal(format!("correlation_id column: {e}")))?;
            EventId::parse(correlation)
        }
        None => Err(CoreError::validation(format!(
            "causation_id {causation_id} does not reference a persisted event"
        ))),
    }
}

async fn next_sequence_number(
    tx: &mut Transaction<'static, Sqlite>,
    stream_type: StreamType,
    stream_id: &str,
) -> CoreResult<i64> {
    let max: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(sequence_number) FROM events WHERE stream_type = ? AND stream_id = ?",
    )
    .bind(stream_type.as_str())
    .bind(stream_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| CoreError::transient(format!("sequence lookup failed: {e}")))?;

    Ok(max.unwrap_or(0) + 1)
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Event> {
    let data_raw: String = row
        .try_get("data")
        .map_err(|e| CoreError::internal(format!("data column: {e}")))?;
    let stream_type_raw: String = row
        .try_get("stream_type")
        .map_err(|e| CoreError::internal(format!("stream_type column: {e}")))?;
    let causation_raw: Option<String> = row
        .try_get("causation_id")
        .map_err(|e| CoreError::internal(format!("causation_id column: {e}")))?;
    let correlation_raw: String = row
        .try_get("correlation_id")
        .map_err(|e| CoreError::internal(format!("correlation_id column: {e}")))?;
    let event_id_raw: String = row
        .try_get("event_id")
        .map_err(|e| CoreError::internal(format!("event_id column: {e}")))?;

    Ok(Event {
        event_id: EventId::parse(event_id_raw)?,
        sequence_number: row
            .try_get("sequence_number")
            .map_err(|e| CoreError::internal(format!("sequence_number column: {e}")))?,
        event_type: row
            .try_get("event_type")
            .map_err(|e| CoreError::internal(format!("event_type column: {e}")))?,
        stream_type: stream_type_raw.parse()?,
        stream_id: row
            .try_get("stream_id")
            .map_err(|e| CoreError::internal(format!("stream_id column: {e}")))?,
        data: serde_json::from_str(&data_raw)
            .map_err(|e| CoreError::corruption(format!("event data is not valid JSON: {e}")))?,
        causation_id: causation_raw.map(EventId::parse).transpose()?,
        correlation_id: EventId::parse(correlation_raw)?,
        occurred_at: fleet_store::get_datetime(row, "occurred_at")?,
        recorded_at: fleet_store::get_datetime(row, "recorded_at")?,
        schema_version: row
            .try_get("schema_version")
            .map_err(|e| CoreError::internal(format!("schema_version column: {e}")))?,
    })
}

/// `GetByStream(type, id, after_sequence?)`.
pub async fn get_by_stream(
    pool: &sqlx::SqlitePool,
    stream_type: StreamType,
    stream_id: &str,
    after_sequence: Option<i64>,
) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM events
        WHERE stream_type = ? AND stream_id = ? AND sequence_number > ?
        ORDER BY sequence_number ASC
        "#,
    )
    .bind(stream_type.as_str())
    .bind(stream_id)
    .bind(after_sequence.unwrap_or(0))
    .fetch_all(pool)
    .await
    .map_err(|e| CoreError::transient(format!("get_by_stream failed: {e}")))?;

    rows.iter().map(row_to_event).collect()
}

/// Transaction-scoped variant of [`get_by_stream`], used by
/// `fleet-checkpoint::create` so `recovery_context`'s event reads observe
/// the same snapshot as the sortie/lock/message rows it's computed beside.
pub async fn get_by_stream_in_tx(
    tx: &mut Transaction<'static, Sqlite>,
    stream_type: StreamType,
    stream_id: &str,
    after_sequence: Option<i64>,
) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM events
        WHERE stream_type = ? AND stream_id = ? AND sequence_number > ?
        ORDER BY sequence_number ASC
        "#,
    )
    .bind(stream_type.as_str())
    .bind(stream_id)
    .bind(after_sequence.unwrap_or(0))
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| CoreError::transient(format!("get_by_stream_in_tx failed: {e}")))?;

    rows.iter().map(row_to_event).collect()
}

/// `GetByType`.
pub async fn get_by_type(pool: &sqlx::SqlitePool, event_type: &str) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query("SELECT * FROM events WHERE event_type = ? ORDER BY global_seq ASC")
        .bind(event_type)
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::transient(format!("get_by_type failed: {e}")))?;
    rows.iter().map(row_to_event).collect()
}

/// `GetByCausation`.
pub async fn get_by_causation(pool: &sqlx::SqlitePool, causation_id: &EventId) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query("SELECT * FROM events WHERE causation_id = ? ORDER BY global_seq ASC")
        .bind(causation_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::transient(format!("get_by_causation failed: {e}")))?;
    rows.iter().map(row_to_event).collect()
}

/// `GetByCorrelation`.
pub async fn get_by_correlation(pool: &sqlx::SqlitePool, correlation_id: &EventId) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query("SELECT * FROM events WHERE correlation_id = ? ORDER BY global_seq ASC")
        .bind(correlation_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(|e| CoreError::transient(format!("get_by_correlation failed: {e}")))?;
    rows.iter().map(row_to_event).collect()
}

/// `GetAfterSequence(global, limit?)` — global ordering by `recorded_at`,
/// tied-broken by a monotonic insertion counter.
pub async fn get_after_sequence(
    pool: &sqlx::SqlitePool,
    global_seq: i64,
    limit: Option<i64>,
) -> CoreResult<Vec<Event>> {
    let rows = sqlx::query(
        "SELECT * FROM events WHERE global_seq > ? ORDER BY global_seq ASC LIMIT ?",
    )
    .bind(global_seq)
    .bind(limit.unwrap_or(1000))
    .fetch_all(pool)
    .await
    .map_err(|e| CoreError::transient(format!("get_after_sequence failed: {e}")))?;
    rows.iter().map(row_to_event).collect()
}

/// `Count(filter?)`, filtered by an optional event_type.
pub async fn count(pool: &sqlx::SqlitePool, event_type: Option<&str>) -> CoreResult<i64> {
    let result = match event_type {
        Some(t) => sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE event_type = ?")
            .bind(t)
            .fetch_one(pool)
            .await,
        None => sqlx::query_scalar("SELECT COUNT(*) FROM events").fetch_one(pool).await,
    };
    result.map_err(|e| CoreError::transient(format!("count failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::CasePolicy;
    use fleet_store::Store;
    use serde_json::json;

    async fn fresh_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn sequence_numbers_are_dense_and_start_at_one() {
        let (_dir, store) = fresh_store().await;
        let mut last = 0;
        for i in 0..4 {
            let event = append(
                &store,
                NewEvent::new("sortie_created", StreamType::Mission, "msn-test", json!({"i": i})),
            )
            .await
            .unwrap();
            assert_eq!(event.sequence_number, last + 1);
            last = event.sequence_number;
        }
    }

    #[tokio::test]
    async fn causation_chain_inherits_correlation_id() {
        let (_dir, store) = fresh_store().await;
        let root = append(
            &store,
            NewEvent::new("mission_created", StreamType::Mission, "msn-test", json!({})),
        )
        .await
        .unwrap();
        assert_eq!(root.correlation_id, root.event_id);

        let child = append(
            &store,
            NewEvent::new("sortie_created", StreamType::Mission, "msn-test", json!({}))
                .caused_by(root.event_id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(child.correlation_id, root.correlation_id);
    }

    #[tokio::test]
    async fn causation_must_reference_a_persisted_event() {
        let (_dir, store) = fresh_store().await;
        let bogus = EventId::generate();
        let result = append(
            &store,
            NewEvent::new("sortie_created", StreamType::Mission, "msn-test", json!({})).caused_by(bogus),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn append_batch_persists_every_event_in_order() {
        let (_dir, store) = fresh_store().await;
        let events = append_batch(
            &store,
            vec![
                NewEvent::new("mission_created", StreamType::Mission, "msn-batch", json!({})),
                NewEvent::new("mission_started", StreamType::Mission, "msn-batch", json!({})),
                NewEvent::new("mission_completed", StreamType::Mission, "msn-batch", json!({})),
            ],
        )
        .await
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence_number, 1);
        assert_eq!(events[1].sequence_number, 2);
        assert_eq!(events[2].sequence_number, 3);

        let stored = get_by_stream(store.pool(), StreamType::Mission, "msn-batch", None).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn append_batch_rolls_back_entirely_on_a_single_failure() {
        let (_dir, store) = fresh_store().await;
        let bogus = EventId::generate();
        let result = append_batch(
            &store,
            vec![
                NewEvent::new("mission_created", StreamType::Mission, "msn-batch", json!({})),
                NewEvent::new("mission_started", StreamType::Mission, "msn-batch", json!({})).caused_by(bogus),
            ],
        )
        .await;

        assert!(result.is_err());
        let stored = get_by_stream(store.pool(), StreamType::Mission, "msn-batch", None).await.unwrap();
        assert!(stored.is_empty(), "a failed batch member must roll back the whole batch");
    }

    #[tokio::test]
    async fn distinct_streams_each_start_their_own_sequence() {
        let (_dir, store) = fresh_store().await;
        let a = append(
            &store,
            NewEvent::new("mission_created", StreamType::Mission, "msn-a", json!({})),
        )
        .await
        .unwrap();
        let b = append(
            &store,
            NewEvent::new("mission_created", StreamType::Mission, "msn-b", json!({})),
        )
        .await
        .unwrap();
        assert_eq!(a.sequence_number, 1);
        assert_eq!(b.sequence_number, 1);
    }
}
