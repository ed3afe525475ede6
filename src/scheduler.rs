//! Write path for slots: validate, check for conflicts, persist.
//!
//! The conflict check and the write are separate store calls. Two clients proposing
//! overlapping slots at the same moment can both pass the check; the double booking
//! then shows up on the next read. Stores that enforce the rule themselves (see
//! `SqliteSlotStore`) close that window.

use crate::conflict::{self, ConflictQuery};
use crate::error::ScheduleError;
use crate::persistence::SlotStore;
use crate::slot::{ScheduleSlot, SlotDraft, SlotFilter, SlotId};
use crate::slot_validation;
use crate::sync::SlotChange;
use std::sync::Arc;

#[derive(Clone)]
pub struct SlotService {
    store: Arc<dyn SlotStore>,
}

impl SlotService {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    pub async fn list(&self, filter: &SlotFilter) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        self.store.list_active_slots(filter).await
    }

    /// Active slots of the query's academic year that clash with the candidate.
    pub async fn check_conflicts(
        &self,
        query: &ConflictQuery,
    ) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        let year_slots = self
            .store
            .list_active_slots(&SlotFilter::academic_year(query.academic_year_id.clone()))
            .await?;
        Ok(query.evaluate(&year_slots))
    }

    async fn ensure_no_conflicts(
        &self,
        draft: &SlotDraft,
        exclude: Option<SlotId>,
    ) -> Result<(), ScheduleError> {
        let year_slots = self
            .store
            .list_active_slots(&SlotFilter::academic_year(draft.academic_year_id.clone()))
            .await?;
        let conflicts = conflict::find_conflicts(&draft.candidate(), &year_slots, exclude);
        if !conflicts.is_empty() {
            return Err(ScheduleError::Conflict {
                conflicts: conflicts.into_iter().cloned().collect(),
            });
        }
        Ok(())
    }

    pub async fn create_slot(&self, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        slot_validation::validate_draft(&draft)?;
        self.ensure_no_conflicts(&draft, None).await?;
        let slot = self.store.create(draft).await?;
        tracing::debug!(slot_id = slot.id, teacher_id = %slot.teacher_id, "slot created");
        Ok(slot)
    }

    /// Replaces a slot in place. The slot never conflicts with its own previous version.
    pub async fn update_slot(
        &self,
        id: SlotId,
        draft: SlotDraft,
    ) -> Result<ScheduleSlot, ScheduleError> {
        slot_validation::validate_draft(&draft)?;
        match self.store.find(id).await? {
            Some(existing) if existing.active => {}
            _ => return Err(ScheduleError::NotFound(id)),
        }
        self.ensure_no_conflicts(&draft, Some(id)).await?;
        let slot = self.store.update(id, draft).await?;
        tracing::debug!(slot_id = slot.id, "slot updated");
        Ok(slot)
    }

    pub async fn remove_slot(&self, id: SlotId) -> Result<(), ScheduleError> {
        self.store.soft_delete(id).await?;
        tracing::debug!(slot_id = id, "slot soft-deleted");
        Ok(())
    }

    /// Checks a change without touching the store.
    pub fn validate_change(change: &SlotChange) -> Result<(), ScheduleError> {
        match change {
            SlotChange::Create { draft } | SlotChange::Update { draft, .. } => {
                slot_validation::validate_draft(draft)?;
            }
            SlotChange::Remove { .. } => {}
        }
        Ok(())
    }

    /// Applies a queued or direct change. Returns the resulting slot for creates and updates.
    pub async fn apply(&self, change: &SlotChange) -> Result<Option<ScheduleSlot>, ScheduleError> {
        match change {
            SlotChange::Create { draft } => self.create_slot(draft.clone()).await.map(Some),
            SlotChange::Update { id, draft } => {
                self.update_slot(*id, draft.clone()).await.map(Some)
            }
            SlotChange::Remove { id } => self.remove_slot(*id).await.map(|_| None),
        }
    }
}
