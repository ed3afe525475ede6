use super::{PersistenceError, PersistenceResult, SlotStore};
use crate::conflict;
use crate::error::ScheduleError;
use crate::feed::{ChangeBroker, ChangeKind, Table};
use crate::slot::{ScheduleSlot, SlotDraft, SlotFilter, SlotId};
use crate::slot_validation;
use crate::time::{ClockTime, DayOfWeek};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use std::sync::{Arc, Mutex};

const SLOT_COLUMNS: &str = "id, school_id, academic_year_id, class_id, teacher_id, subject_id, \
     classroom_id, day_of_week, start_time, end_time, active";

/// SQLite-backed slot store.
///
/// Unlike the in-memory store, create and update re-run the conflict check inside
/// the write transaction, so two writers sharing the database file cannot both
/// book the same teacher or room. Statements run on tokio's blocking pool.
pub struct SqliteSlotStore {
    connection: Arc<Mutex<Connection>>,
    broker: ChangeBroker,
}

impl SqliteSlotStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P, broker: ChangeBroker) -> PersistenceResult<Self> {
        let connection = Connection::open(path)?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            broker,
        })
    }

    pub fn open_in_memory(broker: ChangeBroker) -> PersistenceResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            broker,
        })
    }

    fn initialize_schema(connection: &Connection) -> PersistenceResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS schedule_slots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                school_id TEXT NOT NULL,
                academic_year_id TEXT NOT NULL,
                class_id TEXT NOT NULL,
                teacher_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                classroom_id TEXT,
                day_of_week INTEGER NOT NULL CHECK (day_of_week BETWEEN 1 AND 5),
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                CHECK (start_time < end_time)
            );
            CREATE INDEX IF NOT EXISTS idx_schedule_slots_year_day
                ON schedule_slots(academic_year_id, day_of_week)
                WHERE active = 1;
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, ScheduleError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ScheduleError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut conn = connection.lock().map_err(|_| PersistenceError::Poisoned)?;
            op(&mut conn)
        })
        .await
        .map_err(|err| ScheduleError::storage(format!("sqlite task failed: {err}")))?
    }

    fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleSlot> {
        let day: u8 = row.get("day_of_week")?;
        let day_of_week = DayOfWeek::try_from(day)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Integer, Box::new(err)))?;
        let start: String = row.get("start_time")?;
        let end: String = row.get("end_time")?;
        let start_time = start
            .parse::<ClockTime>()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(err)))?;
        let end_time = end
            .parse::<ClockTime>()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(err)))?;
        Ok(ScheduleSlot {
            id: row.get("id")?,
            school_id: row.get("school_id")?,
            academic_year_id: row.get("academic_year_id")?,
            class_id: row.get("class_id")?,
            teacher_id: row.get("teacher_id")?,
            subject_id: row.get("subject_id")?,
            classroom_id: row.get("classroom_id")?,
            day_of_week,
            start_time,
            end_time,
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    fn load_slot(tx: &Transaction<'_>, id: SlotId) -> PersistenceResult<Option<ScheduleSlot>> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM schedule_slots WHERE id = ?1");
        let slot = tx
            .query_row(&sql, params![id], Self::slot_from_row)
            .optional()?;
        Ok(slot)
    }

    fn ensure_no_conflicts(
        tx: &Transaction<'_>,
        draft: &SlotDraft,
        exclude: Option<SlotId>,
    ) -> Result<(), ScheduleError> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM schedule_slots \
             WHERE active = 1 AND academic_year_id = ?1 AND day_of_week = ?2"
        );
        let mut stmt = tx.prepare(&sql).map_err(PersistenceError::from)?;
        let rows = stmt
            .query_map(
                params![draft.academic_year_id, draft.day_of_week.number()],
                Self::slot_from_row,
            )
            .map_err(PersistenceError::from)?;
        let mut same_day = Vec::new();
        for slot in rows {
            same_day.push(slot.map_err(PersistenceError::from)?);
        }
        let conflicts = conflict::find_conflicts(&draft.candidate(), &same_day, exclude);
        if !conflicts.is_empty() {
            return Err(ScheduleError::Conflict {
                conflicts: conflicts.into_iter().cloned().collect(),
            });
        }
        Ok(())
    }

    fn publish(&self, kind: ChangeKind, slot: &ScheduleSlot) -> Result<(), ScheduleError> {
        let row = serde_json::to_value(slot).map_err(PersistenceError::from)?;
        self.broker
            .publish(Table::ScheduleSlots, &slot.school_id, kind, row);
        Ok(())
    }

    fn insert_slot(conn: &mut Connection, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        let tx = conn.transaction().map_err(PersistenceError::from)?;
        Self::ensure_no_conflicts(&tx, &draft, None)?;
        tx.execute(
            "INSERT INTO schedule_slots (school_id, academic_year_id, class_id, teacher_id, \
             subject_id, classroom_id, day_of_week, start_time, end_time, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
            params![
                draft.school_id,
                draft.academic_year_id,
                draft.class_id,
                draft.teacher_id,
                draft.subject_id,
                draft.classroom_id,
                draft.day_of_week.number(),
                draft.start_time.to_string(),
                draft.end_time.to_string(),
            ],
        )
        .map_err(PersistenceError::from)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(PersistenceError::from)?;
        Ok(ScheduleSlot::from_draft(id, draft))
    }

    fn update_slot(
        conn: &mut Connection,
        id: SlotId,
        draft: SlotDraft,
    ) -> Result<ScheduleSlot, ScheduleError> {
        let tx = conn.transaction().map_err(PersistenceError::from)?;
        let mut slot = Self::load_slot(&tx, id)?
            .filter(|slot| slot.active)
            .ok_or(ScheduleError::NotFound(id))?;
        Self::ensure_no_conflicts(&tx, &draft, Some(id))?;
        tx.execute(
            "UPDATE schedule_slots SET school_id = ?2, academic_year_id = ?3, class_id = ?4, \
             teacher_id = ?5, subject_id = ?6, classroom_id = ?7, day_of_week = ?8, \
             start_time = ?9, end_time = ?10 WHERE id = ?1",
            params![
                id,
                draft.school_id,
                draft.academic_year_id,
                draft.class_id,
                draft.teacher_id,
                draft.subject_id,
                draft.classroom_id,
                draft.day_of_week.number(),
                draft.start_time.to_string(),
                draft.end_time.to_string(),
            ],
        )
        .map_err(PersistenceError::from)?;
        tx.commit().map_err(PersistenceError::from)?;
        slot.apply_draft(draft);
        Ok(slot)
    }

    fn deactivate_slot(conn: &mut Connection, id: SlotId) -> Result<ScheduleSlot, ScheduleError> {
        let tx = conn.transaction().map_err(PersistenceError::from)?;
        let mut slot = Self::load_slot(&tx, id)?
            .filter(|slot| slot.active)
            .ok_or(ScheduleError::NotFound(id))?;
        tx.execute(
            "UPDATE schedule_slots SET active = 0 WHERE id = ?1",
            params![id],
        )
        .map_err(PersistenceError::from)?;
        tx.commit().map_err(PersistenceError::from)?;
        slot.active = false;
        Ok(slot)
    }

    fn query_active(conn: &Connection, filter: &SlotFilter) -> PersistenceResult<Vec<ScheduleSlot>> {
        let mut clauses = vec!["active = 1".to_string()];
        let mut values: Vec<String> = Vec::new();
        let criteria = [
            ("school_id", &filter.school_id),
            ("academic_year_id", &filter.academic_year_id),
            ("class_id", &filter.class_id),
            ("teacher_id", &filter.teacher_id),
            ("classroom_id", &filter.classroom_id),
        ];
        for (column, value) in criteria {
            if let Some(value) = value {
                values.push(value.clone());
                clauses.push(format!("{column} = ?{}", values.len()));
            }
        }
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM schedule_slots WHERE {} \
             ORDER BY day_of_week, start_time, id",
            clauses.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::slot_from_row)?;
        let mut slots = Vec::new();
        for slot in rows {
            slots.push(slot?);
        }
        Ok(slots)
    }

    fn query_one(conn: &Connection, id: SlotId) -> PersistenceResult<Option<ScheduleSlot>> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM schedule_slots WHERE id = ?1");
        let slot = conn
            .query_row(&sql, params![id], Self::slot_from_row)
            .optional()?;
        Ok(slot)
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn list_active_slots(
        &self,
        filter: &SlotFilter,
    ) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        let filter = filter.clone();
        self.with_connection(move |conn| Ok(Self::query_active(conn, &filter)?))
            .await
    }

    async fn find(&self, id: SlotId) -> Result<Option<ScheduleSlot>, ScheduleError> {
        self.with_connection(move |conn| Ok(Self::query_one(conn, id)?))
            .await
    }

    async fn create(&self, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        slot_validation::validate_draft(&draft)?;
        let slot = self
            .with_connection(move |conn| Self::insert_slot(conn, draft))
            .await?;
        self.publish(ChangeKind::Insert, &slot)?;
        Ok(slot)
    }

    async fn update(&self, id: SlotId, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        slot_validation::validate_draft(&draft)?;
        let slot = self
            .with_connection(move |conn| Self::update_slot(conn, id, draft))
            .await?;
        self.publish(ChangeKind::Update, &slot)?;
        Ok(slot)
    }

    async fn soft_delete(&self, id: SlotId) -> Result<(), ScheduleError> {
        let slot = self
            .with_connection(move |conn| Self::deactivate_slot(conn, id))
            .await?;
        self.publish(ChangeKind::Delete, &slot)?;
        Ok(())
    }
}
