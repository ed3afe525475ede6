use crate::time::{ClockTime, DayOfWeek};
use serde::{Deserialize, Serialize};

pub type SlotId = i64;

/// The `(school_id, academic_year_id)` pair every query and subscription is filtered by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub school_id: String,
    pub academic_year_id: String,
}

impl Scope {
    pub fn new(school_id: impl Into<String>, academic_year_id: impl Into<String>) -> Self {
        Self {
            school_id: school_id.into(),
            academic_year_id: academic_year_id.into(),
        }
    }
}

/// A proposed slot that has not been persisted yet. Also used as the body of updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDraft {
    pub school_id: String,
    pub academic_year_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl SlotDraft {
    pub fn scope(&self) -> Scope {
        Scope::new(self.school_id.clone(), self.academic_year_id.clone())
    }

    pub fn candidate(&self) -> SlotCandidate {
        SlotCandidate {
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            teacher_id: self.teacher_id.clone(),
            classroom_id: self.classroom_id.clone(),
        }
    }
}

/// One scheduled occurrence of a class/teacher/room/subject combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: SlotId,
    pub school_id: String,
    pub academic_year_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ScheduleSlot {
    pub fn from_draft(id: SlotId, draft: SlotDraft) -> Self {
        Self {
            id,
            school_id: draft.school_id,
            academic_year_id: draft.academic_year_id,
            class_id: draft.class_id,
            teacher_id: draft.teacher_id,
            subject_id: draft.subject_id,
            classroom_id: draft.classroom_id,
            day_of_week: draft.day_of_week,
            start_time: draft.start_time,
            end_time: draft.end_time,
            active: true,
        }
    }

    pub fn draft(&self) -> SlotDraft {
        SlotDraft {
            school_id: self.school_id.clone(),
            academic_year_id: self.academic_year_id.clone(),
            class_id: self.class_id.clone(),
            teacher_id: self.teacher_id.clone(),
            subject_id: self.subject_id.clone(),
            classroom_id: self.classroom_id.clone(),
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    /// Replaces every mutable field with the draft's values, keeping id and active flag.
    pub fn apply_draft(&mut self, draft: SlotDraft) {
        let id = self.id;
        let active = self.active;
        *self = Self::from_draft(id, draft);
        self.active = active;
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.school_id.clone(), self.academic_year_id.clone())
    }

    pub fn candidate(&self) -> SlotCandidate {
        SlotCandidate {
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            teacher_id: self.teacher_id.clone(),
            classroom_id: self.classroom_id.clone(),
        }
    }
}

/// The fields of a slot that take part in conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCandidate {
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub teacher_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
}

impl SlotCandidate {
    /// The teacher/day key, plus the room/day key when a room is booked.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys = vec![ResourceKey::Teacher {
            day_of_week: self.day_of_week,
            teacher_id: self.teacher_id.clone(),
        }];
        if let Some(classroom_id) = &self.classroom_id {
            keys.push(ResourceKey::Classroom {
                day_of_week: self.day_of_week,
                classroom_id: classroom_id.clone(),
            });
        }
        keys
    }

    pub fn shares_resource_with(&self, other: &SlotCandidate) -> bool {
        let keys = self.resource_keys();
        other.resource_keys().iter().any(|key| keys.contains(key))
    }
}

/// Unit over which no two active slots may overlap in time. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Teacher {
        day_of_week: DayOfWeek,
        teacher_id: String,
    },
    Classroom {
        day_of_week: DayOfWeek,
        classroom_id: String,
    },
}

/// Query filter accepted by slot stores. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
}

impl SlotFilter {
    pub fn scoped(scope: &Scope) -> Self {
        Self {
            school_id: Some(scope.school_id.clone()),
            academic_year_id: Some(scope.academic_year_id.clone()),
            ..Self::default()
        }
    }

    pub fn academic_year(academic_year_id: impl Into<String>) -> Self {
        Self {
            academic_year_id: Some(academic_year_id.into()),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = Some(class_id.into());
        self
    }

    pub fn with_teacher(mut self, teacher_id: impl Into<String>) -> Self {
        self.teacher_id = Some(teacher_id.into());
        self
    }

    pub fn with_classroom(mut self, classroom_id: impl Into<String>) -> Self {
        self.classroom_id = Some(classroom_id.into());
        self
    }

    /// True for active slots whose fields match every set criterion.
    pub fn matches(&self, slot: &ScheduleSlot) -> bool {
        fn field_matches(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().is_none_or(|e| e == actual)
        }

        slot.active
            && field_matches(&self.school_id, &slot.school_id)
            && field_matches(&self.academic_year_id, &slot.academic_year_id)
            && field_matches(&self.class_id, &slot.class_id)
            && field_matches(&self.teacher_id, &slot.teacher_id)
            && match &self.classroom_id {
                Some(expected) => slot.classroom_id.as_deref() == Some(expected.as_str()),
                None => true,
            }
    }
}
