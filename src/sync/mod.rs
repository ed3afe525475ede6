//! Snapshot synchronization and offline write queueing for one signed-in session.

mod orchestrator;

pub use orchestrator::SyncOrchestrator;

use crate::feed::Table;
use crate::slot::{ScheduleSlot, SlotDraft, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "table")]
pub enum SyncTrigger {
    /// First load after sign-in.
    Initial,
    ChangeFeed(Table),
    Timer,
    Manual,
    Reconnect,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Initial => f.write_str("initial"),
            SyncTrigger::ChangeFeed(table) => write!(f, "change_feed:{table}"),
            SyncTrigger::Timer => f.write_str("timer"),
            SyncTrigger::Manual => f.write_str("manual"),
            SyncTrigger::Reconnect => f.write_str("reconnect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed {
        trigger: SyncTrigger,
        synced_at: DateTime<Utc>,
    },
    /// Another episode was running; it reloads once more before releasing.
    Deferred,
    /// The scope was torn down; nothing was swapped in.
    Cancelled,
    /// Trigger named a table that is not watched.
    Ignored,
}

/// A slot write, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SlotChange {
    Create { draft: SlotDraft },
    Update { id: SlotId, draft: SlotDraft },
    Remove { id: SlotId },
}

impl SlotChange {
    pub fn target(&self) -> Option<SlotId> {
        match self {
            SlotChange::Create { .. } => None,
            SlotChange::Update { id, .. } | SlotChange::Remove { id } => Some(*id),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlotChange::Create { .. } => "create",
            SlotChange::Update { .. } => "update",
            SlotChange::Remove { .. } => "remove",
        }
    }
}

/// A write attempted while disconnected. Appended and removed, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: Uuid,
    pub payload: SlotChange,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingChange {
    pub fn new(payload: SlotChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_changes: VecDeque<PendingChange>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_sync_time: None,
            last_error: None,
            pending_changes: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied(Option<ScheduleSlot>),
    Queued(Uuid),
}

/// Result of replaying the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Every entry attempted, in attempt order.
    pub attempted: Vec<Uuid>,
    pub replayed: Vec<Uuid>,
    /// Entries left queued, with the reason their replay failed.
    pub failed: Vec<(Uuid, String)>,
}

impl ReplayReport {
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}
