use super::{PersistenceError, SlotStore};
use crate::error::ScheduleError;
use crate::feed::{ChangeBroker, ChangeKind, Table};
use crate::slot::{ScheduleSlot, Scope, SlotDraft, SlotFilter, SlotId};
use crate::slot_validation;
use crate::snapshot::EntitySource;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

fn slot_row(slot: &ScheduleSlot) -> Result<Value, ScheduleError> {
    serde_json::to_value(slot).map_err(|err| PersistenceError::from(err).into())
}

/// Slot store held in memory. Writes are echoed on the broker so every subscriber,
/// the writer included, sees them.
pub struct InMemorySlotStore {
    slots: RwLock<BTreeMap<SlotId, ScheduleSlot>>,
    next_id: AtomicI64,
    broker: ChangeBroker,
    offline: AtomicBool,
}

impl InMemorySlotStore {
    pub fn new(broker: ChangeBroker) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            broker,
            offline: AtomicBool::new(false),
        }
    }

    /// Seeds the store with existing records, e.g. loaded from a file. Nothing is published.
    pub fn with_slots(broker: ChangeBroker, slots: Vec<ScheduleSlot>) -> Self {
        let next = slots.iter().map(|slot| slot.id).max().unwrap_or(0) + 1;
        let store = Self::new(broker);
        store.next_id.store(next, Ordering::SeqCst);
        store
            .slots
            .write()
            .extend(slots.into_iter().map(|slot| (slot.id, slot)));
        store
    }

    pub fn broker(&self) -> &ChangeBroker {
        &self.broker
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every record, soft-deleted ones included.
    pub fn all_slots(&self) -> Vec<ScheduleSlot> {
        self.slots.read().values().cloned().collect()
    }

    fn ensure_online(&self) -> Result<(), ScheduleError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ScheduleError::network("slot store unreachable"));
        }
        Ok(())
    }

    fn publish(&self, kind: ChangeKind, slot: &ScheduleSlot) -> Result<(), ScheduleError> {
        let row = slot_row(slot)?;
        self.broker
            .publish(Table::ScheduleSlots, &slot.school_id, kind, row);
        Ok(())
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn list_active_slots(
        &self,
        filter: &SlotFilter,
    ) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        self.ensure_online()?;
        Ok(self
            .slots
            .read()
            .values()
            .filter(|slot| filter.matches(slot))
            .cloned()
            .collect())
    }

    async fn find(&self, id: SlotId) -> Result<Option<ScheduleSlot>, ScheduleError> {
        self.ensure_online()?;
        Ok(self.slots.read().get(&id).cloned())
    }

    async fn create(&self, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        self.ensure_online()?;
        slot_validation::validate_draft(&draft)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = ScheduleSlot::from_draft(id, draft);
        self.slots.write().insert(id, slot.clone());
        self.publish(ChangeKind::Insert, &slot)?;
        Ok(slot)
    }

    async fn update(&self, id: SlotId, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        self.ensure_online()?;
        slot_validation::validate_draft(&draft)?;
        let updated = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(&id)
                .filter(|slot| slot.active)
                .ok_or(ScheduleError::NotFound(id))?;
            slot.apply_draft(draft);
            slot.clone()
        };
        self.publish(ChangeKind::Update, &updated)?;
        Ok(updated)
    }

    async fn soft_delete(&self, id: SlotId) -> Result<(), ScheduleError> {
        self.ensure_online()?;
        let removed = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(&id)
                .filter(|slot| slot.active)
                .ok_or(ScheduleError::NotFound(id))?;
            slot.active = false;
            slot.clone()
        };
        self.publish(ChangeKind::Delete, &removed)?;
        Ok(())
    }
}

/// Sibling school records (students, teachers, payments, ...) kept as JSON rows.
///
/// Rows are scoped by their `school_id` field, and by `academic_year_id` when the
/// row carries one.
pub struct InMemoryEntityStore {
    rows: RwLock<HashMap<Table, Vec<Value>>>,
    broker: ChangeBroker,
    offline: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new(broker: ChangeBroker) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            broker,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Appends a row and publishes an insert for its school.
    pub fn insert(&self, table: Table, row: Value) {
        self.rows.write().entry(table).or_default().push(row.clone());
        if let Some(school_id) = row.get("school_id").and_then(Value::as_str) {
            self.broker
                .publish(table, school_id, ChangeKind::Insert, row.clone());
        }
    }

    fn in_scope(row: &Value, scope: &Scope) -> bool {
        let school_matches =
            row.get("school_id").and_then(Value::as_str) == Some(scope.school_id.as_str());
        let year_matches = match row.get("academic_year_id").and_then(Value::as_str) {
            Some(year) => year == scope.academic_year_id,
            None => true,
        };
        school_matches && year_matches
    }
}

#[async_trait]
impl EntitySource for InMemoryEntityStore {
    async fn list(&self, table: Table, scope: &Scope) -> Result<Vec<Value>, ScheduleError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ScheduleError::network(format!("{table} source unreachable")));
        }
        Ok(self
            .rows
            .read()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::in_scope(row, scope))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
