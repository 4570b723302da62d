//! Live status pushes for stream observers.
//!
//! Each subscription gets its own short-lived task: it pushes one snapshot
//! immediately and another every interval until the observer drops the
//! stream or the notifier is shut down. Pushes are full snapshots; a slow
//! observer may miss some.

use crate::session::{SessionManager, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest accepted push interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Fans out periodic session snapshots.
#[derive(Clone)]
pub struct StatusNotifier {
    sessions: Arc<SessionManager>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl StatusNotifier {
    /// Create a notifier; intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn new(sessions: Arc<SessionManager>, interval: Duration) -> Self {
        Self {
            sessions,
            interval: interval.max(MIN_INTERVAL),
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to snapshots. Dropping the stream ends the subscription.
    pub fn subscribe(&self) -> ReceiverStream<SessionState> {
        let (tx, rx) = mpsc::channel(1);
        let sessions = Arc::clone(&self.sessions);
        let shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        match tx.try_send(sessions.snapshot()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => debug!("status observer lagging; snapshot skipped"),
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!("status subscription ended");
        });

        ReceiverStream::new(rx)
    }

    /// End every live subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::PresenceEngine;
    use crate::events::create_shared_log;
    use crate::session::{RunState, StartOptions};
    use tokio::time::Instant;
    use tokio_stream::StreamExt;

    fn notifier() -> StatusNotifier {
        let sessions = Arc::new(SessionManager::new(
            PresenceEngine::new(None, EngineConfig::default()),
            create_shared_log(None),
        ));
        StatusNotifier::new(sessions, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_snapshot_immediate_then_periodic() {
        let notifier = notifier();
        let start = Instant::now();
        let mut stream = notifier.subscribe();

        let first = stream.next().await.unwrap();
        assert_eq!(first.state, RunState::Idle);
        assert_eq!(start.elapsed(), Duration::ZERO);

        notifier
            .sessions
            .start_session("focus", &StartOptions::default())
            .unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.state, RunState::Active);
        assert_eq!(second.mode, "focus");
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        stream.next().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        notifier.sessions.stop_session();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_streams() {
        let notifier = notifier();
        let mut stream = notifier.subscribe();
        stream.next().await.unwrap();

        notifier.shutdown();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_task_exits_after_unsubscribe() {
        let sessions = Arc::new(SessionManager::new(
            PresenceEngine::new(None, EngineConfig::default()),
            create_shared_log(None),
        ));
        let notifier = StatusNotifier::new(sessions.clone(), Duration::from_secs(2));
        let base = Arc::strong_count(&sessions);

        let mut stream = notifier.subscribe();
        stream.next().await.unwrap();
        assert_eq!(Arc::strong_count(&sessions), base + 1);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(Arc::strong_count(&sessions), base);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised() {
        let sessions = Arc::new(SessionManager::new(
            PresenceEngine::new(None, EngineConfig::default()),
            create_shared_log(None),
        ));
        let notifier = StatusNotifier::new(sessions, Duration::ZERO);
        let start = Instant::now();
        let mut stream = notifier.subscribe();

        stream.next().await.unwrap();
        stream.next().await.unwrap();
        assert_eq!(start.elapsed(), MIN_INTERVAL);
    }
}
