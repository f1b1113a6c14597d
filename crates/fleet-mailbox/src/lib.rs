//! The Mailbox — per-addressee message queues with read/ack
//! state and a Recovery-only requeue.
//!
//! `mark_read`/`acknowledge` are idempotent status advances: calling either
//! twice leaves the row exactly where the first call left it.

use fleet_model::{CoreError, CoreResult, Mailbox, MailboxId, Message, MessageId, MessagePriority, MessageStatus, NewEvent, SpecialistId, StreamType};
use fleet_projections::{queries, Ledger};
use serde_json::json;

#[derive(Clone)]
pub struct MailboxService {
    ledger: Ledger,
}

impl MailboxService {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// `Send`: auto-creates the addressee's mailbox on first
    /// send, inside the same write transaction as the `message_sent`
    /// event and its projection.
    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        owner_id: &SpecialistId,
        sender_id: Option<&SpecialistId>,
        thread_id: Option<&str>,
        message_type: &str,
        content: serde_json::Value,
        priority: MessagePriority,
        causation_id: Option<fleet_model::EventId>,
    ) -> CoreResult<Message> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;

            let mailbox_id = match queries::get_mailbox_by_owner_in_tx(&mut write.tx, owner_id).await? {
                Some(existing) => existing.mailbox_id,
                None => MailboxId::generate(),
            };
            let message_id = MessageId::generate();

            let mut input = NewEvent::new(
                "message_sent",
                StreamType::Squawk,
                mailbox_id.as_str(),
                json!({
                    "message_id": message_id.as_str(),
                    "mailbox_owner_id": owner_id.as_str(),
                    "sender_id": sender_id.map(SpecialistId::as_str),
                    "thread_id": thread_id,
                    "message_type": message_type,
                    "content": content.clone(),
                    "priority": priority_str(priority),
                }),
            );
            if let Some(causation_id) = causation_id.clone() {
                input = input.caused_by(causation_id);
            }

            let event = self.ledger.append_in_tx(&mut write.tx, input).await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(Message {
                id: message_id,
                mailbox_id,
                sender_id: sender_id.cloned(),
                thread_id: thread_id.map(str::to_owned),
                message_type: message_type.to_string(),
                content: event.data.get("content").cloned().unwrap_or(serde_json::Value::Null),
                status: MessageStatus::Pending,
                priority,
                sent_at: event.recorded_at,
                read_at: None,
                acked_at: None,
                causation_id: event.causation_id,
            })
        })
        .await
    }

    /// `GetByMailbox(options)`: ordered by `sent_at` then
    /// insertion id; `status` narrows to one lifecycle stage.
    pub async fn get_by_mailbox(&self, mailbox_id: &MailboxId, status: Option<MessageStatus>) -> CoreResult<Vec<Message>> {
        queries::list_messages(self.ledger.store().pool(), mailbox_id, status).await
    }

    pub async fn get_pending(&self, mailbox_id: &MailboxId) -> CoreResult<Vec<Message>> {
        queries::list_messages(self.ledger.store().pool(), mailbox_id, Some(MessageStatus::Pending)).await
    }

    /// `MarkRead`: idempotent — already-read or already-acked
    /// messages return unchanged rather than erroring.
    pub async fn mark_read(&self, message_id: &MessageId) -> CoreResult<Message> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let existing = queries::get_message_in_tx(&mut write.tx, message_id)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("message {message_id} not found")))?;

            if existing.status != MessageStatus::Pending {
                write.rollback().await?;
                return Ok(existing);
            }

            self.ledger
                .append_in_tx(
                    &mut write.tx,
                    NewEvent::new(
                        "message_read",
                        StreamType::Squawk,
                        existing.mailbox_id.as_str(),
                        json!({"message_id": message_id.as_str()}),
                    ),
                )
                .await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(Message {
                status: MessageStatus::Read,
                read_at: Some(chrono::Utc::now()),
                ..existing
            })
        })
        .await
    }

    /// `Acknowledge`: idempotent once already `acked`.
    pub async fn acknowledge(&self, message_id: &MessageId) -> CoreResult<Message> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let existing = queries::get_message_in_tx(&mut write.tx, message_id)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("message {message_id} not found")))?;

            if existing.status == MessageStatus::Acked {
                write.rollback().await?;
                return Ok(existing);
            }

            self.ledger
                .append_in_tx(
                    &mut write.tx,
                    NewEvent::new(
                        "message_acked",
                        StreamType::Squawk,
                        existing.mailbox_id.as_str(),
                        json!({"message_id": message_id.as_str()}),
                    ),
                )
                .await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();

            Ok(Message {
                status: MessageStatus::Acked,
                acked_at: Some(chrono::Utc::now()),
                ..existing
            })
        })
        .await
    }

    /// Transaction-scoped variant of [`requeue`], used by
    /// `fleet-recovery::restore` so every requeued message shares its
    /// overarching write transaction.
    pub async fn requeue_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        message_id: &MessageId,
    ) -> CoreResult<Message> {
        let existing = queries::get_message_in_tx(tx, message_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("message {message_id} not found")))?;

        self.ledger
            .append_in_tx(
                tx,
                NewEvent::new(
                    "message_requeued",
                    StreamType::Squawk,
                    existing.mailbox_id.as_str(),
                    json!({"message_id": message_id.as_str()}),
                ),
            )
            .await?;

        Ok(Message {
            status: MessageStatus::Pending,
            read_at: None,
            acked_at: None,
            ..existing
        })
    }

    /// `Requeue`: restricted to the Recovery Engine. Not wired
    /// into any HTTP route by `fleet-daemon` — only `fleet-recovery` holds
    /// a `MailboxService` handle during `Restore`.
    pub async fn requeue(&self, message_id: &MessageId) -> CoreResult<Message> {
        fleet_store::retry_transient(|| async {
            let mut write = self.ledger.store().begin_write().await?;
            let message = self.requeue_in_tx(&mut write.tx, message_id).await?;
            write.commit().await?;
            self.ledger.store().note_write_committed();
            Ok(message)
        })
        .await
    }

    pub async fn get_mailbox(&self, id: &MailboxId) -> CoreResult<Option<Mailbox>> {
        queries::get_mailbox(self.ledger.store().pool(), id).await
    }
}

fn priority_str(priority: MessagePriority) -> &'static str {
    match priority {
        MessagePriority::Low => "low",
        MessagePriority::Normal => "normal",
        MessagePriority::High => "high",
        MessagePriority::Urgent => "urgent",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::CasePolicy;
    use std::sync::Arc;

    async fn fresh_service() -> (tempfile::TempDir, MailboxService) {
        let dir = tempfile::tempdir().unwrap();
        let store = fleet_store::Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
            .await
            .unwrap();
        (dir, MailboxService::new(Ledger::new(Arc::new(store))))
    }

    #[tokio::test]
    async fn send_auto_creates_the_mailbox_and_preserves_order() {
        let (_dir, mailbox) = fresh_service().await;
        let owner = SpecialistId::generate();

        let m1 = mailbox
            .send(&owner, None, None, "note", json!({"n": 1}), MessagePriority::Normal, None)
            .await
            .unwrap();
        let m2 = mailbox
            .send(&owner, None, None, "note", json!({"n": 2}), MessagePriority::Normal, None)
            .await
            .unwrap();
        let m3 = mailbox
            .send(&owner, None, None, "note", json!({"n": 3}), MessagePriority::Normal, None)
            .await
            .unwrap();

        assert_eq!(m1.mailbox_id, m2.mailbox_id);
        assert_eq!(m2.mailbox_id, m3.mailbox_id);

        let pending = mailbox.get_by_mailbox(&m1.mailbox_id, Some(MessageStatus::Pending)).await.unwrap();
        assert_eq!(pending.iter().map(|m| &m.id).collect::<Vec<_>>(), vec![&m1.id, &m2.id, &m3.id]);

        mailbox.mark_read(&m2.id).await.unwrap();
        let pending = mailbox.get_pending(&m1.mailbox_id).await.unwrap();
        assert_eq!(pending.iter().map(|m| &m.id).collect::<Vec<_>>(), vec![&m1.id, &m3.id]);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (_dir, mailbox) = fresh_service().await;
        let owner = SpecialistId::generate();
        let msg = mailbox
            .send(&owner, None, None, "note", json!({}), MessagePriority::Normal, None)
            .await
            .unwrap();

        let first = mailbox.mark_read(&msg.id).await.unwrap();
        let second = mailbox.mark_read(&msg.id).await.unwrap();
        assert_eq!(first.status, MessageStatus::Read);
        assert_eq!(second.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn requeue_clears_read_and_ack_state() {
        let (_dir, mailbox) = fresh_service().await;
        let owner = SpecialistId::generate();
        let msg = mailbox
            .send(&owner, None, None, "note", json!({}), MessagePriority::Normal, None)
            .await
            .unwrap();

        mailbox.acknowledge(&msg.id).await.unwrap();
        let requeued = mailbox.requeue(&msg.id).await.unwrap();
        assert_eq!(requeued.status, MessageStatus::Pending);
        assert!(requeued.read_at.is_none());
        assert!(requeued.acked_at.is_none());
    }
}
