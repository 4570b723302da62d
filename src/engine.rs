//! Presence engine: the loop that keeps the host looking attended.
//!
//! Each tick the engine reads the pointer, backs off for a while when the
//! pointer moved further than the engine itself moved it (a real user is
//! there), and otherwise nudges the pointer by a small random displacement.
//! Platform failures are reported as events and never end the loop; only
//! cancellation does.
//!
//! ```text
//! Starting ──▶ Running ──(cancel)──▶ Stopped
//!                 │  ▲
//!                 └──┘ tick: read → suppress? → move → emit
//! ```

use crate::config::EngineConfig;
use crate::events::{meta, EventSink};
use crate::platform::{manhattan, Platform, SharedPlatform};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason recorded on `engine_stop`.
pub const STOP_REASON_CANCEL: &str = "context_cancel";

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// User activity suppression was in effect
    Suppressed,
    /// A displacement was generated (and performed when a platform exists)
    Moved { dx: i32, dy: i32 },
}

/// Engine-local state carried across ticks of one run.
#[derive(Debug, Default)]
struct ActivityState {
    last_pos: Option<(i32, i32)>,
    suppressed_until: Option<Instant>,
}

/// The presence loop, cheap to clone into a spawned task.
#[derive(Clone)]
pub struct PresenceEngine {
    platform: SharedPlatform,
    config: EngineConfig,
}

impl PresenceEngine {
    pub fn new(platform: SharedPlatform, config: EngineConfig) -> Self {
        Self { platform, config }
    }

    /// Whether runs will touch a real (or virtual) platform.
    pub fn has_platform(&self) -> bool {
        self.platform.is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run until `cancel` fires.
    ///
    /// The first tick happens one period after entry. Idle prevention is
    /// released on every exit path, including the task being dropped.
    pub async fn run<S>(&self, mode: &str, cancel: CancellationToken, sink: &S)
    where
        S: EventSink + ?Sized,
    {
        let _sleep_guard = self.platform.as_ref().map(|platform| {
            if let Err(e) = platform.prevent_sleep(true) {
                warn!(error = %e, "could not enable idle prevention");
                sink.emit("prevent_sleep_error", meta([("error", e.to_string())]));
            }
            SleepGuard {
                platform: Arc::clone(platform),
            }
        });

        info!(mode, headless = self.platform.is_none(), "presence engine started");
        sink.emit("engine_start", meta([("mode", mode)]));

        let mut state = ActivityState::default();
        let mut ticker = interval_at(Instant::now() + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.tick(mode, &mut state, sink);
                    debug!(?outcome, "engine tick");
                }
            }
        }

        info!(mode, "presence engine stopped");
        sink.emit("engine_stop", meta([("reason", STOP_REASON_CANCEL)]));
    }

    fn tick<S>(&self, mode: &str, state: &mut ActivityState, sink: &S) -> TickOutcome
    where
        S: EventSink + ?Sized,
    {
        let now = Instant::now();

        if let Some(platform) = &self.platform {
            if let Ok(pos) = platform.cursor_pos() {
                if let Some(last) = state.last_pos {
                    if manhattan(pos, last) > self.config.activity_threshold {
                        let until = now + self.config.pause_window;
                        state.suppressed_until = Some(until);
                        let wall_until = Utc::now()
                            + chrono::Duration::from_std(self.config.pause_window)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        debug!(?pos, ?last, "user activity detected");
                        sink.emit(
                            "user_active_pause",
                            meta([(
                                "until",
                                wall_until.to_rfc3339_opts(SecondsFormat::Secs, true),
                            )]),
                        );
                    }
                }
                state.last_pos = Some(pos);
            }
        }

        if matches!(state.suppressed_until, Some(until) if now < until) {
            return TickOutcome::Suppressed;
        }

        let (dx, dy) = sample_displacement(self.config.max_step, self.config.fallback_step);

        if let Some(platform) = &self.platform {
            match platform.simulate_move(dx, dy) {
                Ok(()) => {
                    if let Ok(pos) = platform.cursor_pos() {
                        state.last_pos = Some(pos);
                    }
                }
                Err(e) => {
                    warn!(error = %e, dx, dy, "simulated move failed");
                    sink.emit("move_error", meta([("error", e.to_string())]));
                }
            }
        }

        sink.emit(
            "micro_move",
            meta([
                ("mode", mode.to_string()),
                ("dx", dx.to_string()),
                ("dy", dy.to_string()),
            ]),
        );
        TickOutcome::Moved { dx, dy }
    }
}

/// Releases idle prevention when the run ends.
struct SleepGuard {
    platform: Arc<dyn Platform>,
}

impl Drop for SleepGuard {
    fn drop(&mut self) {
        if let Err(e) = self.platform.prevent_sleep(false) {
            warn!(error = %e, "could not release idle prevention");
        }
    }
}

/// Draw a displacement with each component uniform in `[-max_step, max_step]`.
pub fn sample_displacement(max_step: i32, fallback_step: i32) -> (i32, i32) {
    let max_step = max_step.abs();
    let mut rng = rand::rng();
    let dx = rng.random_range(-max_step..=max_step);
    let dy = rng.random_range(-max_step..=max_step);
    non_zero(dx, dy, fallback_step)
}

/// Replace a `(0, 0)` displacement so every action is visible.
///
/// A zero `fallback_step` is treated as one.
pub fn non_zero(dx: i32, dy: i32, fallback_step: i32) -> (i32, i32) {
    if dx == 0 && dy == 0 {
        (fallback_step.saturating_abs().max(1), dy)
    } else {
        (dx, dy)
    }
}
