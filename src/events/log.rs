//! Append-only record of everything the agent did.
//!
//! Every lifecycle transition and every simulated action is appended here,
//! so a remote caller can audit exactly what ran on the host.

use super::{EventSink, Meta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the event was appended
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Event name, e.g. `micro_move`
    pub action: String,
    /// Free-form string attributes
    pub meta: Meta,
}

impl LogEntry {
    pub fn new(action: impl Into<String>, meta: Meta) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            meta,
        }
    }
}

/// Ordered event log, safe to append from any task.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    /// Maximum number of retained entries; `None` keeps everything
    capacity: Option<usize>,
}

impl EventLog {
    /// Create an unbounded event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that evicts its oldest entries beyond `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Append one entry at the tail.
    pub fn append(&self, entry: LogEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        if let Some(cap) = self.capacity {
            while entries.len() > cap {
                entries.pop_front();
            }
        }
    }

    /// Copy of the full sequence as of this call.
    pub fn read_all(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Entries stamped at or after `since`, in emission order.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for EventLog {
    fn emit(&self, action: &str, meta: Meta) {
        self.append(LogEntry::new(action, meta));
    }
}

/// Thread-safe shared event log.
pub type SharedEventLog = Arc<EventLog>;

/// Create a new shared event log, bounded when `capacity` is set.
pub fn create_shared_log(capacity: Option<usize>) -> SharedEventLog {
    match capacity {
        Some(cap) => Arc::new(EventLog::with_capacity(cap)),
        None => Arc::new(EventLog::new()),
    }
}
