//! Row-level change notifications pushed by the backing store.

use crate::error::ScheduleError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// School-scoped tables whose changes can be watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    ScheduleSlots,
    Students,
    Teachers,
    Classes,
    Subjects,
    Classrooms,
    Payments,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::ScheduleSlots,
        Table::Students,
        Table::Teachers,
        Table::Classes,
        Table::Subjects,
        Table::Classrooms,
        Table::Payments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::ScheduleSlots => "schedule_slots",
            Table::Students => "students",
            Table::Teachers => "teachers",
            Table::Classes => "classes",
            Table::Subjects => "subjects",
            Table::Classrooms => "classrooms",
            Table::Payments => "payments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == needle)
            .ok_or_else(|| format!("unknown table '{needle}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// What a subscriber receives: the kind of change and the row as it looks afterwards
/// (before, for deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub kind: ChangeKind,
    pub row: Value,
}

pub type FeedSubscription = mpsc::UnboundedReceiver<ChangePayload>;

/// Push-based change stream of the backing store, filtered per table and school.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: Table, school_id: &str)
    -> Result<FeedSubscription, ScheduleError>;
}

struct Subscriber {
    table: Table,
    school_id: String,
    sender: mpsc::UnboundedSender<ChangePayload>,
}

/// In-process change feed. Stores publish after every successful write and each
/// matching subscriber receives the payload in publication order.
#[derive(Clone, Default)]
pub struct ChangeBroker {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl ChangeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, table: Table, school_id: &str, kind: ChangeKind, row: Value) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in subscribers
            .iter()
            .filter(|sub| sub.table == table && sub.school_id == school_id)
        {
            let _ = sub.sender.send(ChangePayload {
                kind,
                row: row.clone(),
            });
        }
        tracing::trace!(%table, school_id, ?kind, "published change");
    }

    /// Number of live subscriptions. Dropped receivers are not counted.
    pub fn active_subscriptions(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| !sub.sender.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl ChangeFeed for ChangeBroker {
    async fn subscribe(
        &self,
        table: Table,
        school_id: &str,
    ) -> Result<FeedSubscription, ScheduleError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            table,
            school_id: school_id.to_string(),
            sender,
        });
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broker_filters_by_table_and_school() {
        let broker = ChangeBroker::new();
        let mut slots = broker.subscribe(Table::ScheduleSlots, "s1").await.unwrap();
        let mut other_school = broker.subscribe(Table::ScheduleSlots, "s2").await.unwrap();

        broker.publish(Table::Students, "s1", ChangeKind::Insert, json!({"id": 1}));
        broker.publish(Table::ScheduleSlots, "s1", ChangeKind::Update, json!({"id": 2}));

        let received = slots.recv().await.unwrap();
        assert_eq!(received.kind, ChangeKind::Update);
        assert_eq!(received.row, json!({"id": 2}));
        assert!(slots.try_recv().is_err());
        assert!(other_school.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let broker = ChangeBroker::new();
        let rx = broker.subscribe(Table::Teachers, "s1").await.unwrap();
        assert_eq!(broker.active_subscriptions(), 1);
        drop(rx);
        assert_eq!(broker.active_subscriptions(), 0);
    }

    #[test]
    fn table_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
        assert!("weekends".parse::<Table>().is_err());
    }
}
