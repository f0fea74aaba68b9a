use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the SQLite locked projection state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStoreConfig {
    /// Path to the SQLite database holding projection rows
    pub path: PathBuf,

    /// Name of the projection this store guards
    pub projection: String,

    /// Table holding one row per projection
    /// Default: "projections"
    #[serde(default = "default_table")]
    pub table: String,

    /// Directory holding the per-key lock files
    /// Default: `<path>.locks`
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,

    /// SQLite synchronous mode for the state database
    #[serde(default)]
    pub synchronous: SynchronousMode,

    /// How long a state write waits on a busy database
    /// Default: 5000ms
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynchronousMode {
    /// Full fsync (safest, slowest)
    #[default]
    Full,
    /// fsync at critical moments
    Normal,
    /// No fsync
    Off,
}

impl SynchronousMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            SynchronousMode::Full => "FULL",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Off => "OFF",
        }
    }
}

fn default_table() -> String {
    "projections".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl ProjectionStoreConfig {
    pub fn new(path: impl Into<PathBuf>, projection: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            projection: projection.into(),
            table: default_table(),
            lock_dir: None,
            synchronous: SynchronousMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    pub fn with_synchronous(mut self, synchronous: SynchronousMode) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Resolved lock directory
    pub fn lock_dir(&self) -> PathBuf {
        match &self.lock_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut name = self.path.as_os_str().to_owned();
                name.push(".locks");
                PathBuf::from(name)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.projection.is_empty() {
            return Err(TesseraError::InvalidArgument(
                "projection name must not be empty".into(),
            ));
        }
        if !is_identifier(&self.table) {
            return Err(TesseraError::InvalidArgument(format!(
                "table name {:?} is not a plain SQL identifier",
                self.table
            )));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
