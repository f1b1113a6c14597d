//! [`Ledger`] — composes [`fleet_eventlog::append_in_tx`] with
//! [`crate::apply`] so an event and its projection update land in exactly
//! one write transaction.
//!
//! Command crates (`fleet-locks`, `fleet-mailbox`, `fleet-checkpoint`,
//! `fleet-recovery`) that need to run their own pre-checks (conflict
//! detection, ownership checks) inside that same transaction should call
//! [`Ledger::append_in_tx`] directly against a `WriteTxn` they already
//! opened, rather than going through [`Ledger::append`], which owns its
//! transaction end to end and is meant for simple, single-event commands.

use std::sync::Arc;

use fleet_model::{CoreResult, Event, NewEvent};
use fleet_store::Store;
use sqlx::{Sqlite, Transaction};

#[derive(Clone)]
pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Append `input` and apply its projection, inside the caller's own
    /// write transaction. Does not commit — the caller decides when its
    /// surrounding command's other writes are also ready.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        input: NewEvent,
    ) -> CoreResult<Event> {
        let event = fleet_eventlog::append_in_tx(tx, input).await?;
        crate::apply(tx, &event).await?;
        Ok(event)
    }

    /// Append a single event end to end: opens its own write transaction,
    /// applies the projection, and commits. For commands with no
    /// additional invariant to check inside the same transaction.
    ///
    /// Wrapped in [`fleet_store::retry_transient`] since a
    /// `TRANSIENT` failure here (a busy pool, a dropped connection) is the
    /// common case the retry contract exists for — every caller going
    /// through `Ledger::append` gets bounded retries for free.
    pub async fn append(&self, input: NewEvent) -> CoreResult<Event> {
        fleet_store::retry_transient(|| async {
            let mut write = self.store.begin_write().await?;
            let event = self.append_in_tx(&mut write.tx, input.clone()).await?;
            write.commit().await?;
            self.store.note_write_committed();
            Ok(event)
        })
        .await
    }

    /// `AppendBatch([input]) -> [Event]`: every input is
    /// appended and projected inside one write transaction, committed only
    /// if all succeed — a failure partway through rolls back the entire
    /// batch, so callers never observe a partial projection update. Retried
    /// as a whole on a `TRANSIENT` failure, same as [`Ledger::append`].
    pub async fn append_batch(&self, inputs: Vec<NewEvent>) -> CoreResult<Vec<Event>> {
        fleet_store::retry_transient(|| async {
            let mut write = self.store.begin_write().await?;
            let mut events = Vec::with_capacity(inputs.len());
            for input in inputs.iter().cloned() {
                events.push(self.append_in_tx(&mut write.tx, input).await?);
            }
            write.commit().await?;
            self.store.note_write_committed();
            Ok(events)
        })
        .await
    }
}
