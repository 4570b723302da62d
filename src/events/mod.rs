//! Event emission for the agent.
//!
//! The engine and the session orchestrator report what they do through an
//! [`EventSink`]; the [`EventLog`] is the sink that keeps the record.

pub mod log;

use std::collections::BTreeMap;

pub use log::{create_shared_log, EventLog, LogEntry, SharedEventLog};

/// String attributes attached to an event.
pub type Meta = BTreeMap<String, String>;

/// Receiver for emitted events.
pub trait EventSink: Send + Sync {
    fn emit(&self, action: &str, meta: Meta);
}

/// Build a [`Meta`] map from key/value pairs.
pub fn meta<K, V, const N: usize>(pairs: [(K, V); N]) -> Meta
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
