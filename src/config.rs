use crate::feed::Table;
use crate::slot::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the reconciliation timer.
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
    /// Tables whose change feeds trigger a reload.
    pub watched_tables: BTreeSet<Table>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            watched_tables: Table::ALL.into_iter().collect(),
        }
    }
}

impl SyncConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_watched_tables<I: IntoIterator<Item = Table>>(mut self, tables: I) -> Self {
        self.watched_tables = tables.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    pub school_id: String,
    pub academic_year_id: String,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            db_path: None,
            school_id: "default".to_string(),
            academic_year_id: "current".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "could not read config: {err}"),
            ConfigError::Parse(err) => write!(f, "could not parse config: {err}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value '{value}' for {key}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Defaults overridden by `TIMETABLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TIMETABLE_HTTP_ADDR") {
            self.http_addr = addr;
        }
        if let Some(path) = lookup("TIMETABLE_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(school_id) = lookup("TIMETABLE_SCHOOL_ID") {
            self.school_id = school_id;
        }
        if let Some(year) = lookup("TIMETABLE_ACADEMIC_YEAR_ID") {
            self.academic_year_id = year;
        }
        if let Some(secs) = lookup("TIMETABLE_SYNC_INTERVAL_SECS") {
            let parsed = secs
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "TIMETABLE_SYNC_INTERVAL_SECS",
                    value: secs.clone(),
                })?;
            self.sync.interval = Duration::from_secs(parsed);
        }
        if let Some(tables) = lookup("TIMETABLE_WATCHED_TABLES") {
            let mut watched = BTreeSet::new();
            for name in tables.split(',').filter(|n| !n.trim().is_empty()) {
                let table = name.parse::<Table>().map_err(|_| ConfigError::InvalidValue {
                    key: "TIMETABLE_WATCHED_TABLES",
                    value: name.to_string(),
                })?;
                watched.insert(table);
            }
            self.sync.watched_tables = watched;
        }
        Ok(())
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.school_id.clone(), self.academic_year_id.clone())
    }
}
