use timetable_sync::{
    ClockTime, ConflictQuery, DayOfWeek, ScheduleSlot, SlotCandidate, find_conflicts, has_conflict,
};

fn t(s: &str) -> ClockTime {
    s.parse().unwrap()
}

fn slot(id: i64, teacher: &str, room: Option<&str>, day: DayOfWeek, start: &str, end: &str) -> ScheduleSlot {
    ScheduleSlot {
        id,
        school_id: "s1".into(),
        academic_year_id: "2025".into(),
        class_id: "7A".into(),
        teacher_id: teacher.into(),
        subject_id: "math".into(),
        classroom_id: room.map(Into::into),
        day_of_week: day,
        start_time: t(start),
        end_time: t(end),
        active: true,
    }
}

fn candidate(teacher: &str, room: Option<&str>, day: DayOfWeek, start: &str, end: &str) -> SlotCandidate {
    SlotCandidate {
        day_of_week: day,
        start_time: t(start),
        end_time: t(end),
        teacher_id: teacher.into(),
        classroom_id: room.map(Into::into),
    }
}

fn monday_booking() -> Vec<ScheduleSlot> {
    vec![slot(1, "T", Some("R1"), DayOfWeek::Monday, "08:00", "10:00")]
}

#[test]
fn overlapping_teacher_booking_conflicts_in_any_room() {
    let existing = monday_booking();
    assert!(has_conflict(
        &candidate("T", None, DayOfWeek::Monday, "09:00", "11:00"),
        &existing,
        None
    ));
    assert!(has_conflict(
        &candidate("T", Some("R9"), DayOfWeek::Monday, "09:00", "11:00"),
        &existing,
        None
    ));
}

#[test]
fn adjacent_slots_do_not_conflict() {
    let existing = monday_booking();
    assert!(!has_conflict(
        &candidate("T", Some("R1"), DayOfWeek::Monday, "10:00", "12:00"),
        &existing,
        None
    ));
    assert!(!has_conflict(
        &candidate("T", Some("R1"), DayOfWeek::Monday, "07:00", "08:00"),
        &existing,
        None
    ));
}

#[test]
fn room_overlap_conflicts_for_a_different_teacher() {
    let existing = monday_booking();
    assert!(has_conflict(
        &candidate("U", Some("R1"), DayOfWeek::Monday, "08:00", "10:00"),
        &existing,
        None
    ));
    // Without a room the candidate only competes for the teacher.
    assert!(!has_conflict(
        &candidate("U", None, DayOfWeek::Monday, "08:00", "10:00"),
        &existing,
        None
    ));
}

#[test]
fn different_day_never_conflicts() {
    let existing = monday_booking();
    assert!(!has_conflict(
        &candidate("T", Some("R1"), DayOfWeek::Tuesday, "08:00", "10:00"),
        &existing,
        None
    ));
}

#[test]
fn inactive_slots_are_ignored() {
    let mut existing = monday_booking();
    existing[0].active = false;
    assert!(!has_conflict(
        &candidate("T", Some("R1"), DayOfWeek::Monday, "08:00", "10:00"),
        &existing,
        None
    ));
}

#[test]
fn overlap_matches_half_open_rule_on_a_grid() {
    let existing = vec![slot(1, "T", None, DayOfWeek::Wednesday, "10:00", "11:00")];
    let times: Vec<ClockTime> = (8..=13)
        .flat_map(|h| [ClockTime::from_hm(h, 0).unwrap(), ClockTime::from_hm(h, 30).unwrap()])
        .collect();
    for &start in &times {
        for &end in times.iter().filter(|end| **end > start) {
            let c = SlotCandidate {
                day_of_week: DayOfWeek::Wednesday,
                start_time: start,
                end_time: end,
                teacher_id: "T".into(),
                classroom_id: None,
            };
            let expected = start < existing[0].end_time && existing[0].start_time < end;
            assert_eq!(
                has_conflict(&c, &existing, None),
                expected,
                "{start}-{end} against 10:00-11:00"
            );
        }
    }
}

#[test]
fn excluding_the_only_overlapping_slot_clears_the_check() {
    let existing = vec![
        slot(1, "T", Some("R1"), DayOfWeek::Monday, "08:00", "10:00"),
        slot(2, "T", Some("R1"), DayOfWeek::Monday, "10:00", "11:00"),
    ];
    let query = ConflictQuery {
        teacher_id: "T".into(),
        classroom_id: Some("R1".into()),
        day_of_week: DayOfWeek::Monday,
        start_time: t("08:30"),
        end_time: t("09:30"),
        academic_year_id: "2025".into(),
        exclude_slot_id: Some(1),
    };
    assert!(query.evaluate(&existing).is_empty());

    let without_exclusion = ConflictQuery {
        exclude_slot_id: None,
        ..query
    };
    let conflicts = without_exclusion.evaluate(&existing);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, 1);
}

#[test]
fn exclusion_only_removes_the_named_slot() {
    let existing = vec![
        slot(1, "T", None, DayOfWeek::Friday, "08:00", "10:00"),
        slot(2, "U", Some("R2"), DayOfWeek::Friday, "09:00", "10:00"),
    ];
    let c = candidate("T", Some("R2"), DayOfWeek::Friday, "09:00", "09:45");
    let ids: Vec<i64> = find_conflicts(&c, &existing, Some(1))
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![2]);
}

#[test]
fn check_is_scoped_to_the_academic_year() {
    let mut other_year = slot(5, "T", None, DayOfWeek::Monday, "08:00", "10:00");
    other_year.academic_year_id = "2024".into();
    let query = ConflictQuery {
        teacher_id: "T".into(),
        classroom_id: None,
        day_of_week: DayOfWeek::Monday,
        start_time: t("08:00"),
        end_time: t("09:00"),
        academic_year_id: "2025".into(),
        exclude_slot_id: None,
    };
    assert!(query.evaluate(&[other_year]).is_empty());
}
