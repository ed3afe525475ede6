use crate::error::ScheduleError;
use crate::feed::Table;
use crate::persistence::SlotStore;
use crate::session::Session;
use crate::slot::{ScheduleSlot, Scope, SlotFilter};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory aggregate of every school-scoped entity presented to observers.
///
/// Always replaced as a whole; a reload never patches an existing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolSnapshot {
    pub scope: Scope,
    pub slots: Vec<ScheduleSlot>,
    pub aggregates: BTreeMap<Table, Vec<Value>>,
}

impl SchoolSnapshot {
    pub fn empty(scope: Scope) -> Self {
        Self {
            scope,
            slots: Vec::new(),
            aggregates: BTreeMap::new(),
        }
    }

    pub fn rows(&self, table: Table) -> &[Value] {
        self.aggregates
            .get(&table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Records of the sibling stores (students, teachers, payments, ...), consumed as JSON rows.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn list(&self, table: Table, scope: &Scope) -> Result<Vec<Value>, ScheduleError>;
}

/// Produces a complete snapshot for a session's scope.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self, session: &Session) -> Result<SchoolSnapshot, ScheduleError>;
}

/// Loads slots from the slot store and every other table from an entity source.
pub struct StoreSnapshotLoader {
    slots: Arc<dyn SlotStore>,
    entities: Arc<dyn EntitySource>,
    tables: Vec<Table>,
}

impl StoreSnapshotLoader {
    pub fn new(slots: Arc<dyn SlotStore>, entities: Arc<dyn EntitySource>) -> Self {
        Self::with_tables(slots, entities, Table::ALL)
    }

    pub fn with_tables<I>(slots: Arc<dyn SlotStore>, entities: Arc<dyn EntitySource>, tables: I) -> Self
    where
        I: IntoIterator<Item = Table>,
    {
        let mut tables: Vec<Table> = tables
            .into_iter()
            .filter(|table| *table != Table::ScheduleSlots)
            .collect();
        tables.sort();
        tables.dedup();
        Self {
            slots,
            entities,
            tables,
        }
    }
}

#[async_trait]
impl SnapshotLoader for StoreSnapshotLoader {
    async fn load(&self, session: &Session) -> Result<SchoolSnapshot, ScheduleError> {
        let scope = session.scope();
        let mut snapshot = SchoolSnapshot::empty(scope.clone());
        snapshot.slots = self.slots.list_active_slots(&SlotFilter::scoped(&scope)).await?;
        snapshot.slots.sort_by(|a, b| {
            (a.day_of_week, a.start_time, a.id).cmp(&(b.day_of_week, b.start_time, b.id))
        });
        for table in &self.tables {
            let rows = self.entities.list(*table, &scope).await?;
            snapshot.aggregates.insert(*table, rows);
        }
        Ok(snapshot)
    }
}
