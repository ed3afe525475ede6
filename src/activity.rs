use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One structured activity-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub school_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub level: ActivityLevel,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        school_id: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        level: ActivityLevel,
    ) -> Self {
        Self {
            school_id: school_id.into(),
            user_id: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            level,
            details: Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for activity entries. Persistence lives outside this crate, so
/// recording never fails from the caller's point of view.
pub trait ActivitySink: Send + Sync {
    fn record(&self, entry: ActivityEntry);
}

/// Writes entries to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn record(&self, entry: ActivityEntry) {
        let ActivityEntry {
            school_id,
            user_id,
            action,
            entity_type,
            entity_id,
            level,
            details,
            ..
        } = entry;
        let user_id = user_id.unwrap_or_default();
        let entity_id = entity_id.unwrap_or_default();
        let success = level == ActivityLevel::Success;
        match level {
            ActivityLevel::Error => tracing::error!(
                target: "activity", %school_id, %user_id, %action, %entity_type, %entity_id, %details
            ),
            ActivityLevel::Warning => tracing::warn!(
                target: "activity", %school_id, %user_id, %action, %entity_type, %entity_id, %details
            ),
            ActivityLevel::Info | ActivityLevel::Success => tracing::info!(
                target: "activity", %school_id, %user_id, %action, %entity_type, %entity_id, %details, success
            ),
        }
    }
}

/// Keeps entries in memory, in recording order.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl ActivitySink for MemoryActivityLog {
    fn record(&self, entry: ActivityEntry) {
        self.entries.lock().push(entry);
    }
}
