use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Maximum number of entries retained. Older entries are dropped from the
/// tail as new ones are prepended.
const MAX_ENTRIES: usize = 1000;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Which subsystem produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    System,
    Scan,
    Symlink,
}

/// One entry in the ledger, in the shape the dashboard consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub source: LogSource,
}

/// Bounded, newest-first in-memory log buffer.
///
/// Cheap to clone; all clones share the same buffer. There is no deletion
/// API beyond [`clear`](Ledger::clear) — entries age out at [`MAX_ENTRIES`].
#[derive(Clone, Default)]
pub struct Ledger {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the front, truncating to the retention cap.
    /// Returns the created entry.
    pub fn append(
        &self,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
        details: Option<String>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
            source,
        };
        let mut entries = self.entries.lock();
        entries.push_front(entry.clone());
        entries.truncate(MAX_ENTRIES);
        entry
    }

    /// Snapshot of all entries, newest first.
    pub fn list(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
