use crate::error::ScheduleError;
use crate::slot::{ScheduleSlot, SlotDraft, SlotFilter, SlotId};
use crate::slot_validation;
use async_trait::async_trait;
use serde_json::Error as SerdeJsonError;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum PersistenceError {
    Serialization(SerdeJsonError),
    Io(io::Error),
    #[cfg(feature = "sqlite")]
    Sqlite(rusqlite::Error),
    Csv(csv::Error),
    InvalidData(String),
    NotFound(SlotId),
    Poisoned,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Serialization(err) => write!(f, "serialization error: {err}"),
            PersistenceError::Io(err) => write!(f, "io error: {err}"),
            #[cfg(feature = "sqlite")]
            PersistenceError::Sqlite(err) => write!(f, "sqlite error: {err}"),
            PersistenceError::Csv(err) => write!(f, "csv error: {err}"),
            PersistenceError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            PersistenceError::NotFound(id) => write!(f, "slot {id} not found"),
            PersistenceError::Poisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<SerdeJsonError> for PersistenceError {
    fn from(value: SerdeJsonError) -> Self {
        Self::Serialization(value)
    }
}

impl From<io::Error> for PersistenceError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<csv::Error> for PersistenceError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable slot records. Removal is always a soft delete: the row stays for audit
/// with `active = false` and disappears from every listing.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn list_active_slots(&self, filter: &SlotFilter)
    -> Result<Vec<ScheduleSlot>, ScheduleError>;
    async fn find(&self, id: SlotId) -> Result<Option<ScheduleSlot>, ScheduleError>;
    async fn create(&self, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError>;
    async fn update(&self, id: SlotId, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError>;
    async fn soft_delete(&self, id: SlotId) -> Result<(), ScheduleError>;
}

pub fn validate_slots(slots: &[ScheduleSlot]) -> PersistenceResult<()> {
    slot_validation::validate_slot_collection(slots)
        .map_err(|err| PersistenceError::InvalidData(err.to_string()))
}

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::{load_slots_from_csv, load_slots_from_json, save_slots_to_csv, save_slots_to_json};
pub use memory::{InMemoryEntityStore, InMemorySlotStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSlotStore;
