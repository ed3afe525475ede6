use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use timetable_sync::feed::FeedSubscription;
use timetable_sync::{
    ChangeBroker, ChangeFeed, ChangeKind, ChangePayload, ScheduleError, SubscriptionMultiplexer,
    Table,
};
use tokio::sync::mpsc;

/// Broker wrapper that refuses one table.
struct FlakyFeed {
    inner: ChangeBroker,
    broken: Table,
}

#[async_trait]
impl ChangeFeed for FlakyFeed {
    async fn subscribe(
        &self,
        table: Table,
        school_id: &str,
    ) -> Result<FeedSubscription, ScheduleError> {
        if table == self.broken {
            return Err(ScheduleError::network(format!("{table} feed refused")));
        }
        self.inner.subscribe(table, school_id).await
    }
}

fn collector() -> (
    impl Fn(Table, ChangePayload) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<(Table, ChangePayload)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |table: Table, payload: ChangePayload| {
        let _ = tx.send((table, payload));
    }, rx)
}

#[tokio::test]
async fn events_are_tagged_with_their_table_and_keep_per_table_order() {
    let broker = ChangeBroker::new();
    let mux = SubscriptionMultiplexer::new(Arc::new(broker.clone()));
    let (on_event, mut events) = collector();
    let handle = mux
        .open("s1", [Table::ScheduleSlots, Table::Students], on_event)
        .await;
    assert_eq!(handle.subscribed_tables(), &[Table::ScheduleSlots, Table::Students]);

    for id in 1..=5 {
        broker.publish(Table::ScheduleSlots, "s1", ChangeKind::Update, json!({ "id": id }));
    }
    broker.publish(Table::Students, "s1", ChangeKind::Insert, json!({ "id": 99 }));
    broker.publish(Table::ScheduleSlots, "other-school", ChangeKind::Insert, json!({ "id": 0 }));

    let mut slot_ids = Vec::new();
    let mut student_events = 0;
    for _ in 0..6 {
        let (table, payload) = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match table {
            Table::ScheduleSlots => slot_ids.push(payload.row["id"].as_i64().unwrap()),
            Table::Students => student_events += 1,
            other => panic!("unexpected table {other}"),
        }
    }
    assert_eq!(slot_ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(student_events, 1);

    handle.close();
}

#[tokio::test]
async fn failed_feed_is_skipped_and_the_rest_stay_active() {
    let broker = ChangeBroker::new();
    let feed = FlakyFeed {
        inner: broker.clone(),
        broken: Table::Payments,
    };
    let mux = SubscriptionMultiplexer::new(Arc::new(feed));
    let (on_event, mut events) = collector();
    let handle = mux
        .open("s1", [Table::Payments, Table::Teachers], on_event)
        .await;

    assert_eq!(handle.subscribed_tables(), &[Table::Teachers]);
    broker.publish(Table::Teachers, "s1", ChangeKind::Insert, json!({ "id": 1 }));
    let (table, _) = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table, Table::Teachers);
    handle.close();
}

#[tokio::test]
async fn close_is_idempotent_and_releases_every_feed() {
    let broker = ChangeBroker::new();
    let mux = SubscriptionMultiplexer::new(Arc::new(broker.clone()));
    let delivered = Arc::new(Mutex::new(0usize));
    let counter = delivered.clone();
    let handle = mux
        .open("s1", Table::ALL, move |_, _| *counter.lock() += 1)
        .await;
    assert_eq!(broker.active_subscriptions(), Table::ALL.len());

    mux.close(&handle);
    handle.close();
    assert!(handle.is_closed());
    assert!(handle.cancellation_token().is_cancelled());

    // Aborted forwarders drop their receivers once the runtime gets to them.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.active_subscriptions(), 0);

    broker.publish(Table::ScheduleSlots, "s1", ChangeKind::Insert, json!({ "id": 1 }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*delivered.lock(), 0);
}

#[tokio::test]
async fn duplicate_tables_open_a_single_feed() {
    let broker = ChangeBroker::new();
    let mux = SubscriptionMultiplexer::new(Arc::new(broker.clone()));
    let handle = mux
        .open(
            "s1",
            [Table::Classes, Table::Classes, Table::Subjects],
            |_, _| {},
        )
        .await;
    assert_eq!(handle.subscribed_tables(), &[Table::Classes, Table::Subjects]);
    assert_eq!(broker.active_subscriptions(), 2);
    assert_eq!(handle.school_id(), "s1");
    handle.close();
}
