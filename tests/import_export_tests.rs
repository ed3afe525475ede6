use std::io::Write;

use timetable_sync::persistence::{
    PersistenceError, load_slots_from_csv, load_slots_from_json, save_slots_to_csv,
    save_slots_to_json,
};
use timetable_sync::{DayOfWeek, ScheduleSlot};
use tempfile::NamedTempFile;

fn build_sample_slots() -> Vec<ScheduleSlot> {
    let mut first = ScheduleSlot {
        id: 1,
        school_id: "s1".into(),
        academic_year_id: "2025".into(),
        class_id: "7A".into(),
        teacher_id: "T".into(),
        subject_id: "math".into(),
        classroom_id: Some("R1".into()),
        day_of_week: DayOfWeek::Monday,
        start_time: "08:00".parse().unwrap(),
        end_time: "09:30".parse().unwrap(),
        active: true,
    };
    let mut archived = first.clone();
    archived.id = 2;
    archived.class_id = "7B".into();
    archived.classroom_id = None;
    archived.day_of_week = DayOfWeek::Thursday;
    archived.active = false;
    first.subject_id = "algebra".into();
    vec![first, archived]
}

#[test]
fn json_export_preserves_every_field() {
    let slots = build_sample_slots();
    let file = NamedTempFile::new().unwrap();
    save_slots_to_json(&slots, file.path()).expect("save json");

    let raw = std::fs::read_to_string(file.path()).unwrap();
    assert!(raw.contains("\"start_time\": \"08:00\""));
    assert!(raw.contains("\"day_of_week\": 1"));

    let loaded = load_slots_from_json(file.path()).expect("load json");
    assert_eq!(loaded, slots);
}

#[test]
fn csv_export_preserves_optional_room_and_active_flag() {
    let slots = build_sample_slots();
    let file = NamedTempFile::new().unwrap();
    save_slots_to_csv(&slots, file.path()).expect("save csv");

    let loaded = load_slots_from_csv(file.path()).expect("load csv");
    assert_eq!(loaded, slots);
    assert_eq!(loaded[1].classroom_id, None);
    assert!(!loaded[1].active);
}

#[test]
fn csv_import_reports_the_offending_row() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "id,school_id,academic_year_id,class_id,teacher_id,subject_id,classroom_id,day_of_week,start_time,end_time,active"
    )
    .unwrap();
    writeln!(file, "7,s1,2025,7A,T,math,,6,08:00,09:00,true").unwrap();
    file.flush().unwrap();

    match load_slots_from_csv(file.path()) {
        Err(PersistenceError::InvalidData(msg)) => {
            assert!(msg.contains("slot 7"), "unexpected message: {msg}");
            assert!(msg.contains("day of week"), "unexpected message: {msg}");
        }
        other => panic!("expected invalid data, got {other:?}"),
    }
}

#[test]
fn import_rejects_reversed_times_and_duplicate_ids() {
    let mut slots = build_sample_slots();
    slots[1].id = 1;
    let file = NamedTempFile::new().unwrap();
    assert!(matches!(
        save_slots_to_json(&slots, file.path()),
        Err(PersistenceError::InvalidData(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"slots": [{{"id": 3, "school_id": "s1", "academic_year_id": "2025", "class_id": "7A",
            "teacher_id": "T", "subject_id": "math", "day_of_week": 2,
            "start_time": "11:00", "end_time": "10:00"}}]}}"#
    )
    .unwrap();
    file.flush().unwrap();
    match load_slots_from_json(file.path()) {
        Err(PersistenceError::InvalidData(msg)) => assert!(msg.contains("before end time")),
        other => panic!("expected invalid data, got {other:?}"),
    }
}

#[test]
fn json_import_rejects_weekend_days() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"slots": [{{"id": 3, "school_id": "s1", "academic_year_id": "2025", "class_id": "7A",
            "teacher_id": "T", "subject_id": "math", "day_of_week": 6,
            "start_time": "09:00", "end_time": "10:00"}}]}}"#
    )
    .unwrap();
    file.flush().unwrap();
    assert!(matches!(
        load_slots_from_json(file.path()),
        Err(PersistenceError::Serialization(_))
    ));
}
