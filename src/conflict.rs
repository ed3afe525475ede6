//! Conflict detection over the active slots of an academic year.
//!
//! Time ranges are half-open: a slot ending at 10:00 and one starting at 10:00
//! are adjacent and never conflict.

use crate::slot::{ScheduleSlot, SlotCandidate, SlotId};
use crate::time::{ClockTime, DayOfWeek};
use serde::{Deserialize, Serialize};

/// Half-open interval overlap: `[a_start, a_end)` intersects `[b_start, b_end)`.
pub fn ranges_overlap(
    a_start: ClockTime,
    a_end: ClockTime,
    b_start: ClockTime,
    b_end: ClockTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// True when `existing` books the same teacher or the same room as the candidate
/// on the same day in an overlapping time range.
pub fn slot_conflicts_with(
    candidate: &SlotCandidate,
    existing: &ScheduleSlot,
    exclude_slot_id: Option<SlotId>,
) -> bool {
    if !existing.active || Some(existing.id) == exclude_slot_id {
        return false;
    }
    if !candidate.shares_resource_with(&existing.candidate()) {
        return false;
    }
    ranges_overlap(
        candidate.start_time,
        candidate.end_time,
        existing.start_time,
        existing.end_time,
    )
}

pub fn has_conflict(
    candidate: &SlotCandidate,
    existing: &[ScheduleSlot],
    exclude_slot_id: Option<SlotId>,
) -> bool {
    existing
        .iter()
        .any(|slot| slot_conflicts_with(candidate, slot, exclude_slot_id))
}

/// Every slot the candidate clashes with, in input order.
pub fn find_conflicts<'a>(
    candidate: &SlotCandidate,
    existing: &'a [ScheduleSlot],
    exclude_slot_id: Option<SlotId>,
) -> Vec<&'a ScheduleSlot> {
    existing
        .iter()
        .filter(|slot| slot_conflicts_with(candidate, slot, exclude_slot_id))
        .collect()
}

/// Arguments of the conflict-check query exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictQuery {
    pub teacher_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub academic_year_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_slot_id: Option<SlotId>,
}

impl ConflictQuery {
    pub fn candidate(&self) -> SlotCandidate {
        SlotCandidate {
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            teacher_id: self.teacher_id.clone(),
            classroom_id: self.classroom_id.clone(),
        }
    }

    /// Conflicting slots of the query's academic year. Empty means the candidate is acceptable.
    pub fn evaluate(&self, slots: &[ScheduleSlot]) -> Vec<ScheduleSlot> {
        let candidate = self.candidate();
        slots
            .iter()
            .filter(|slot| slot.academic_year_id == self.academic_year_id)
            .filter(|slot| slot_conflicts_with(&candidate, slot, self.exclude_slot_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(ranges_overlap(t("08:00"), t("10:00"), t("09:59"), t("11:00")));
        assert!(!ranges_overlap(t("08:00"), t("10:00"), t("10:00"), t("11:00")));
        assert!(!ranges_overlap(t("10:00"), t("11:00"), t("08:00"), t("10:00")));
        assert!(ranges_overlap(t("08:00"), t("12:00"), t("09:00"), t("10:00")));
    }
}
