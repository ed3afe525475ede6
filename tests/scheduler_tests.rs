use std::sync::Arc;

use timetable_sync::persistence::{InMemorySlotStore, SlotStore};
use timetable_sync::{
    ChangeBroker, ChangeFeed, ChangeKind, ConflictQuery, DayOfWeek, ScheduleError, SlotDraft,
    SlotFilter, SlotService, Table,
};

fn draft(class: &str, teacher: &str, room: Option<&str>, day: u8, start: &str, end: &str) -> SlotDraft {
    SlotDraft {
        school_id: "s1".into(),
        academic_year_id: "2025".into(),
        class_id: class.into(),
        teacher_id: teacher.into(),
        subject_id: "math".into(),
        classroom_id: room.map(Into::into),
        day_of_week: DayOfWeek::try_from(day).unwrap(),
        start_time: start.parse().unwrap(),
        end_time: end.parse().unwrap(),
    }
}

fn service() -> (SlotService, Arc<InMemorySlotStore>) {
    let store = Arc::new(InMemorySlotStore::new(ChangeBroker::new()));
    (SlotService::new(store.clone()), store)
}

#[tokio::test]
async fn create_rejects_double_booked_teacher_with_the_clashing_slot() {
    let (service, _) = service();
    let first = service
        .create_slot(draft("7A", "T", Some("R1"), 1, "08:00", "10:00"))
        .await
        .unwrap();

    let err = service
        .create_slot(draft("7B", "T", Some("R2"), 1, "09:00", "11:00"))
        .await
        .unwrap_err();
    match err {
        ScheduleError::Conflict { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, first.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    service
        .create_slot(draft("7B", "T", Some("R1"), 1, "10:00", "12:00"))
        .await
        .expect("adjacent slot is accepted");
}

#[tokio::test]
async fn create_rejects_invalid_drafts_before_touching_the_store() {
    let (service, store) = service();
    let err = service
        .create_slot(draft("7A", "T", None, 2, "10:00", "09:00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = service
        .create_slot(draft("", "T", None, 2, "08:00", "09:00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(store.all_slots().is_empty());
}

#[tokio::test]
async fn update_in_place_does_not_conflict_with_itself() {
    let (service, _) = service();
    let slot = service
        .create_slot(draft("7A", "T", Some("R1"), 3, "08:00", "10:00"))
        .await
        .unwrap();

    let moved = service
        .update_slot(slot.id, draft("7A", "T", Some("R1"), 3, "08:30", "10:30"))
        .await
        .unwrap();
    assert_eq!(moved.id, slot.id);
    assert_eq!(moved.start_time.to_string(), "08:30");
}

#[tokio::test]
async fn removed_slots_stop_blocking_and_stay_for_audit() {
    let (service, store) = service();
    let slot = service
        .create_slot(draft("7A", "T", None, 4, "08:00", "09:00"))
        .await
        .unwrap();
    service.remove_slot(slot.id).await.unwrap();

    let listed = service.list(&SlotFilter::default()).await.unwrap();
    assert!(listed.is_empty());
    let audit = store.all_slots();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].active);

    service
        .create_slot(draft("7B", "T", None, 4, "08:00", "09:00"))
        .await
        .expect("freed slot can be rebooked");

    let err = service.remove_slot(slot.id).await.unwrap_err();
    assert!(matches!(err, ScheduleError::NotFound(id) if id == slot.id));
    let err = service
        .update_slot(slot.id, draft("7A", "T", None, 4, "12:00", "13:00"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn check_conflicts_supports_editing_in_place() {
    let (service, _) = service();
    let slot = service
        .create_slot(draft("7A", "T", Some("R1"), 1, "08:00", "10:00"))
        .await
        .unwrap();
    let mut query = ConflictQuery {
        teacher_id: "T".into(),
        classroom_id: Some("R1".into()),
        day_of_week: DayOfWeek::Monday,
        start_time: "09:00".parse().unwrap(),
        end_time: "09:30".parse().unwrap(),
        academic_year_id: "2025".into(),
        exclude_slot_id: None,
    };
    assert_eq!(service.check_conflicts(&query).await.unwrap().len(), 1);
    query.exclude_slot_id = Some(slot.id);
    assert!(service.check_conflicts(&query).await.unwrap().is_empty());
}

#[tokio::test]
async fn filters_narrow_by_class_teacher_and_room() {
    let (service, _) = service();
    service
        .create_slot(draft("7A", "T", Some("R1"), 1, "08:00", "09:00"))
        .await
        .unwrap();
    service
        .create_slot(draft("7B", "U", Some("R2"), 1, "08:00", "09:00"))
        .await
        .unwrap();

    let by_class = service
        .list(&SlotFilter::default().with_class("7B"))
        .await
        .unwrap();
    assert_eq!(by_class.len(), 1);
    assert_eq!(by_class[0].teacher_id, "U");

    let by_room = service
        .list(&SlotFilter::default().with_classroom("R1"))
        .await
        .unwrap();
    assert_eq!(by_room[0].class_id, "7A");

    let none = service
        .list(&SlotFilter::default().with_teacher("T").with_classroom("R2"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn writes_are_echoed_on_the_change_feed() {
    let broker = ChangeBroker::new();
    let store = Arc::new(InMemorySlotStore::new(broker.clone()));
    let service = SlotService::new(store.clone());
    let mut feed = broker.subscribe(Table::ScheduleSlots, "s1").await.unwrap();

    let slot = service
        .create_slot(draft("7A", "T", None, 5, "08:00", "09:00"))
        .await
        .unwrap();
    service.remove_slot(slot.id).await.unwrap();

    let insert = feed.recv().await.unwrap();
    assert_eq!(insert.kind, ChangeKind::Insert);
    assert_eq!(insert.row["id"], slot.id);
    let delete = feed.recv().await.unwrap();
    assert_eq!(delete.kind, ChangeKind::Delete);
    assert_eq!(delete.row["active"], false);
}

#[tokio::test]
async fn offline_store_surfaces_network_errors() {
    let (service, store) = service();
    store.set_offline(true);
    let err = service
        .create_slot(draft("7A", "T", None, 1, "08:00", "09:00"))
        .await
        .unwrap_err();
    assert!(err.is_connectivity());
    assert!(store.find(1).await.unwrap_err().is_connectivity());
}
