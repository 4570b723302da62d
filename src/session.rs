//! Session orchestration.
//!
//! There is a single global session. [`SessionManager`] owns its state and
//! the cancellation handle of the running engine task, and serializes start,
//! stop and policy-lock requests behind one mutex. The lock is never held
//! across an await: event appends are in-memory and the engine task is
//! spawned, not awaited.

use crate::engine::PresenceEngine;
use crate::events::{meta, EventSink, Meta, SharedEventLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Externally visible run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Active,
    /// Policy-locked (not user-activity suppression)
    Paused,
}

/// Point-in-time copy of the session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub state: RunState,
    /// Label chosen by the start request
    pub mode: String,
    /// Reserved; not driven by the engine
    pub user_present: bool,
    pub policy_locked: bool,
    /// Advisory description of the next scheduled action
    pub next_action: String,
    /// Last successful start; `None` while idle
    pub started_at: Option<DateTime<Utc>>,
}

/// Start request options. Accepted and recorded, but advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
    pub randomness: f64,
    pub idle_threshold_seconds: i64,
    pub max_duration_minutes: i64,
}

impl StartOptions {
    fn as_meta(&self) -> Meta {
        meta([
            ("randomness", self.randomness.to_string()),
            ("idleThresholdSeconds", self.idle_threshold_seconds.to_string()),
            ("maxDurationMinutes", self.max_duration_minutes.to_string()),
        ])
    }
}

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A session is already running
    AlreadyActive,
    /// Starts are blocked by policy
    PolicyLocked,
    /// The request could not be understood
    InvalidInput(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyActive => write!(f, "session already active"),
            SessionError::PolicyLocked => write!(f, "policy locked"),
            SessionError::InvalidInput(e) => write!(f, "invalid payload: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// The engine task bound to the current session.
struct EngineRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    state: SessionState,
    run: Option<EngineRun>,
}

/// Owner of the global session, its engine task and its event log.
pub struct SessionManager {
    inner: Mutex<Inner>,
    engine: PresenceEngine,
    log: SharedEventLog,
}

impl SessionManager {
    pub fn new(engine: PresenceEngine, log: SharedEventLog) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::default(),
                run: None,
            }),
            engine,
            log,
        }
    }

    /// Start a session and launch its engine task.
    ///
    /// Returns as soon as the task is spawned. Must be called from within a
    /// Tokio runtime.
    pub fn start_session(&self, mode: &str, options: &StartOptions) -> Result<(), SessionError> {
        let cancel = CancellationToken::new();
        let stale = {
            let mut inner = self.lock();
            if inner.state.state == RunState::Active {
                return Err(SessionError::AlreadyActive);
            }
            if inner.state.policy_locked {
                return Err(SessionError::PolicyLocked);
            }

            inner.state.state = RunState::Active;
            inner.state.mode = mode.to_string();
            inner.state.started_at = Some(Utc::now());
            inner.state.next_action =
                format!("micro_move in {}ms", self.engine.config().tick.as_millis());

            let mut event = options.as_meta();
            event.insert("mode".to_string(), mode.to_string());
            self.log.emit("session_start", event);

            let engine = self.engine.clone();
            let log = self.log.clone();
            let token = cancel.clone();
            let mode = mode.to_string();
            let task = tokio::spawn(async move {
                engine.run(&mode, token, log.as_ref()).await;
            });

            // A policy-paused session can still own a running engine.
            inner.run.replace(EngineRun { cancel, task })
        };

        if let Some(stale) = stale {
            debug!("cancelling engine left over from a paused session");
            stale.cancel.cancel();
        }
        info!(mode, headless = !self.engine.has_platform(), "session started");
        Ok(())
    }

    /// Stop the session. Idempotent; always records `session_stop`.
    ///
    /// Returns whether an engine task was running. The task exits on its
    /// own at its next scheduling point.
    pub fn stop_session(&self) -> bool {
        let run = {
            let mut inner = self.lock();
            inner.state.state = RunState::Idle;
            inner.state.next_action.clear();
            inner.state.started_at = None;
            let run = inner.run.take();
            if let Some(run) = &run {
                run.cancel.cancel();
            }
            self.log.emit("session_stop", Meta::new());
            run
        };

        info!(was_running = run.is_some(), "session stopped");
        run.is_some()
    }

    /// Set or clear the policy lock.
    ///
    /// Locking forces the state to `Paused` but leaves a running engine
    /// alone; only a stop (or a later start) ends it.
    pub fn set_policy_lock(&self, locked: bool) -> &'static str {
        let action = if locked {
            "policy_locked"
        } else {
            "policy_unlocked"
        };
        {
            let mut inner = self.lock();
            inner.state.policy_locked = locked;
            if locked {
                inner.state.state = RunState::Paused;
            }
            self.log.emit(action, Meta::new());
        }
        info!(locked, "policy lock updated");
        action
    }

    /// Consistent copy of the session state.
    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Whether an engine task is bound to the session.
    pub fn engine_running(&self) -> bool {
        self.lock().run.is_some()
    }

    pub fn log(&self) -> &SharedEventLog {
        &self.log
    }

    /// Stop the session and wait for the engine to finish its cleanup.
    pub async fn shutdown(&self) {
        let run = {
            let mut inner = self.lock();
            let run = inner.run.take();
            if run.is_some() {
                inner.state.state = RunState::Idle;
                inner.state.next_action.clear();
                inner.state.started_at = None;
                self.log.emit("session_stop", meta([("reason", "shutdown")]));
            }
            run
        };

        if let Some(run) = run {
            run.cancel.cancel();
            let _ = run.task.await;
            info!("engine drained for shutdown");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
