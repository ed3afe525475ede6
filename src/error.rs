use crate::persistence::PersistenceError;
use crate::slot::{ScheduleSlot, SlotId};
use crate::slot_validation::SlotValidationError;
use std::fmt;

#[derive(Debug, Clone)]
pub enum ScheduleError {
    /// Malformed candidate slot: missing field, start not before end.
    Validation(String),
    /// The teacher or room is already booked by the listed slots.
    Conflict { conflicts: Vec<ScheduleSlot> },
    NotFound(SlotId),
    /// Backing store unavailable or rejected the write.
    Storage(String),
    /// Session invalid or expired.
    Auth(String),
    /// Feed or connectivity lost.
    Network(String),
}

impl ScheduleError {
    pub fn validation(message: impl Into<String>) -> Self {
        ScheduleError::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        ScheduleError::Storage(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        ScheduleError::Auth(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        ScheduleError::Network(message.into())
    }

    /// Only connectivity failures may be parked in the offline queue.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ScheduleError::Network(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::Validation(_) => "validation",
            ScheduleError::Conflict { .. } => "conflict",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::Storage(_) => "storage",
            ScheduleError::Auth(_) => "auth",
            ScheduleError::Network(_) => "network",
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::Validation(msg) => write!(f, "invalid slot: {msg}"),
            ScheduleError::Conflict { conflicts } => {
                let ids = conflicts
                    .iter()
                    .map(|slot| slot.id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "slot conflicts with existing slot(s) {ids}")
            }
            ScheduleError::NotFound(id) => write!(f, "slot {id} not found"),
            ScheduleError::Storage(msg) => write!(f, "storage error: {msg}"),
            ScheduleError::Auth(msg) => write!(f, "authentication error: {msg}"),
            ScheduleError::Network(msg) => write!(f, "network error: {msg}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<SlotValidationError> for ScheduleError {
    fn from(value: SlotValidationError) -> Self {
        ScheduleError::Validation(value.to_string())
    }
}

impl From<PersistenceError> for ScheduleError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::InvalidData(msg) => ScheduleError::Validation(msg),
            PersistenceError::NotFound(id) => ScheduleError::NotFound(id),
            other => ScheduleError::Storage(other.to_string()),
        }
    }
}
