//! Shared entity types for the FleetTools Coordination Core.
//!
//! No crate in this workspace depends on `fleet-model` for behavior, only
//! shape: identifiers, the event envelope, and the projection entities
//! (`Mission`, `Sortie`, `Specialist`, `Lock`, `Mailbox`/`Message`, `Cursor`,
//! `Checkpoint`) plus the `CoreError` kind enum used at every layer boundary.

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod event;
pub mod ids;
pub mod lock;
pub mod mailbox;
pub mod mission;
pub mod sortie;
pub mod specialist;

pub use checkpoint::{Checkpoint, CheckpointTrigger, NewCheckpoint, RecoveryContext, SortieSnapshot};
pub use cursor::Cursor;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use event::{Event, NewEvent, StreamType};
pub use ids::{CheckpointId, EventId, LockId, MailboxId, MessageId, MissionId, SortieId, SpecialistId};
pub use lock::{CasePolicy, Lock, LockPurpose, LockSnapshot, LockStatus};
pub use mailbox::{Mailbox, Message, MessagePriority, MessageSnapshot, MessageStatus, NewMessage};
pub use mission::{Mission, MissionStatus, NewMission, Priority};
pub use sortie::{NewSortie, Sortie, SortieStatus};
pub use specialist::{NewSpecialist, Specialist, SpecialistStatus};
