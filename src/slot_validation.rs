use crate::slot::{ScheduleSlot, SlotDraft};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone)]
pub struct SlotValidationError {
    message: String,
}

impl SlotValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SlotValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SlotValidationError {}

fn require(field: &str, value: &str) -> Result<(), SlotValidationError> {
    if value.trim().is_empty() {
        return Err(SlotValidationError::new(format!(
            "slot requires a non-empty {field}"
        )));
    }
    Ok(())
}

pub fn validate_draft(draft: &SlotDraft) -> Result<(), SlotValidationError> {
    require("school_id", &draft.school_id)?;
    require("academic_year_id", &draft.academic_year_id)?;
    require("class_id", &draft.class_id)?;
    require("teacher_id", &draft.teacher_id)?;
    require("subject_id", &draft.subject_id)?;
    if let Some(classroom_id) = &draft.classroom_id {
        require("classroom_id", classroom_id)?;
    }

    if draft.start_time >= draft.end_time {
        return Err(SlotValidationError::new(format!(
            "slot start time {} must be before end time {}",
            draft.start_time, draft.end_time
        )));
    }

    Ok(())
}

pub fn validate_slot(slot: &ScheduleSlot) -> Result<(), SlotValidationError> {
    validate_draft(&slot.draft())
        .map_err(|err| SlotValidationError::new(format!("slot {}: {}", slot.id, err)))
}

pub fn validate_slot_collection(slots: &[ScheduleSlot]) -> Result<(), SlotValidationError> {
    let mut seen_ids = HashSet::with_capacity(slots.len());
    for slot in slots {
        if !seen_ids.insert(slot.id) {
            return Err(SlotValidationError::new(format!(
                "duplicate slot id {}",
                slot.id
            )));
        }
        validate_slot(slot)?;
    }
    Ok(())
}
