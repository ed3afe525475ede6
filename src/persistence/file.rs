use super::{PersistenceError, PersistenceResult};
use crate::slot::ScheduleSlot;
use crate::time::{ClockTime, DayOfWeek};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct TimetableSnapshot {
    slots: Vec<ScheduleSlot>,
}

pub fn save_slots_to_json<P: AsRef<Path>>(slots: &[ScheduleSlot], path: P) -> PersistenceResult<()> {
    super::validate_slots(slots)?;
    let snapshot = TimetableSnapshot {
        slots: slots.to_vec(),
    };
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &snapshot)?;
    Ok(())
}

pub fn load_slots_from_json<P: AsRef<Path>>(path: P) -> PersistenceResult<Vec<ScheduleSlot>> {
    let file = File::open(path)?;
    let snapshot: TimetableSnapshot = serde_json::from_reader(file)?;
    super::validate_slots(&snapshot.slots)?;
    Ok(snapshot.slots)
}

#[derive(Default, Serialize, Deserialize)]
struct SlotCsvRecord {
    id: i64,
    school_id: String,
    academic_year_id: String,
    class_id: String,
    teacher_id: String,
    subject_id: String,
    classroom_id: String,
    day_of_week: u8,
    start_time: String,
    end_time: String,
    active: String,
}

impl From<&ScheduleSlot> for SlotCsvRecord {
    fn from(slot: &ScheduleSlot) -> Self {
        Self {
            id: slot.id,
            school_id: slot.school_id.clone(),
            academic_year_id: slot.academic_year_id.clone(),
            class_id: slot.class_id.clone(),
            teacher_id: slot.teacher_id.clone(),
            subject_id: slot.subject_id.clone(),
            classroom_id: slot.classroom_id.clone().unwrap_or_default(),
            day_of_week: slot.day_of_week.number(),
            start_time: slot.start_time.to_string(),
            end_time: slot.end_time.to_string(),
            active: slot.active.to_string(),
        }
    }
}

impl TryFrom<SlotCsvRecord> for ScheduleSlot {
    type Error = PersistenceError;

    fn try_from(record: SlotCsvRecord) -> Result<Self, Self::Error> {
        let row = record.id;
        let invalid = |msg: String| PersistenceError::InvalidData(format!("slot {row}: {msg}"));
        let day_of_week =
            DayOfWeek::try_from(record.day_of_week).map_err(|e| invalid(e.to_string()))?;
        let start_time = record
            .start_time
            .parse::<ClockTime>()
            .map_err(|e| invalid(e.to_string()))?;
        let end_time = record
            .end_time
            .parse::<ClockTime>()
            .map_err(|e| invalid(e.to_string()))?;
        let active = parse_bool(&record.active)
            .ok_or_else(|| invalid(format!("invalid active flag '{}'", record.active)))?;
        let classroom_id = if record.classroom_id.trim().is_empty() {
            None
        } else {
            Some(record.classroom_id)
        };
        Ok(ScheduleSlot {
            id: record.id,
            school_id: record.school_id,
            academic_year_id: record.academic_year_id,
            class_id: record.class_id,
            teacher_id: record.teacher_id,
            subject_id: record.subject_id,
            classroom_id,
            day_of_week,
            start_time,
            end_time,
            active,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn save_slots_to_csv<P: AsRef<Path>>(slots: &[ScheduleSlot], path: P) -> PersistenceResult<()> {
    super::validate_slots(slots)?;
    let mut writer = csv::Writer::from_path(path)?;
    for slot in slots {
        writer.serialize(SlotCsvRecord::from(slot))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_slots_from_csv<P: AsRef<Path>>(path: P) -> PersistenceResult<Vec<ScheduleSlot>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut slots = Vec::new();
    for record in reader.deserialize::<SlotCsvRecord>() {
        slots.push(ScheduleSlot::try_from(record?)?);
    }
    super::validate_slots(&slots)?;
    Ok(slots)
}
