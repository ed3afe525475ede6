pub mod activity;
pub mod config;
pub mod conflict;
pub mod error;
pub mod feed;
pub mod multiplexer;
pub mod persistence;
pub mod scheduler;
pub mod session;
pub mod slot;
pub(crate) mod slot_validation;
pub mod snapshot;
pub mod sync;
pub mod telemetry;
pub mod time;

#[cfg(feature = "http_api")]
pub mod http_api;

pub use activity::{ActivityEntry, ActivityLevel, ActivitySink, MemoryActivityLog, TracingActivitySink};
pub use config::{AppConfig, SyncConfig};
pub use conflict::{ConflictQuery, find_conflicts, has_conflict};
pub use error::ScheduleError;
pub use feed::{ChangeBroker, ChangeFeed, ChangeKind, ChangePayload, Table};
pub use multiplexer::{FeedHandle, SubscriptionMultiplexer};
pub use scheduler::SlotService;
pub use session::{Credentials, Role, Session, SessionManager, SessionStatus, SyncDependencies};
pub use slot::{ScheduleSlot, Scope, SlotCandidate, SlotDraft, SlotFilter, SlotId};
pub use snapshot::{SchoolSnapshot, SnapshotLoader, StoreSnapshotLoader};
pub use sync::{SlotChange, SyncOrchestrator, SyncOutcome, SyncStatus, SyncTrigger, WriteOutcome};
pub use time::{ClockTime, DayOfWeek};
