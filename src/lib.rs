//! APC Agent - supervised presence simulation with a local control surface.
//!
//! The agent runs a single background "presence" loop that periodically
//! nudges the pointer and keeps the host from idling, backs off while a real
//! user is moving the pointer, and records everything it does. A remote
//! caller starts and stops the loop, blocks it by policy, and watches its
//! status live over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          APC Agent                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  HTTP ──▶ ┌──────────────┐  spawn  ┌──────────────┐          │
//! │           │   Session    │────────▶│   Presence   │──▶ Platform
//! │           │ Orchestrator │ cancel  │    Engine    │   (optional)
//! │           └──────────────┘         └──────────────┘          │
//! │              │      ▲                     │                   │
//! │              ▼      │ snapshot            ▼                   │
//! │        ┌──────────┐ │            ┌──────────────┐             │
//! │        │  Status  │─┘            │  Event Log   │             │
//! │        │ Notifier │              └──────────────┘             │
//! │        └──────────┘                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use apc_agent::{create_shared_log, EngineConfig, PresenceEngine, SessionManager, StartOptions};
//!
//! # async fn demo() {
//! let engine = PresenceEngine::new(None, EngineConfig::default());
//! let sessions = SessionManager::new(engine, create_shared_log(None));
//!
//! sessions.start_session("focus", &StartOptions::default()).unwrap();
//! println!("{:?}", sessions.snapshot().state);
//! sessions.stop_session();
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod events;
pub mod notifier;
pub mod platform;
pub mod server;
pub mod session;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, EngineConfig};
pub use engine::{PresenceEngine, TickOutcome};
pub use events::{create_shared_log, EventLog, EventSink, LogEntry, Meta, SharedEventLog};
pub use notifier::StatusNotifier;
pub use platform::{Platform, PlatformError, SharedPlatform, VirtualCursor};
pub use server::{RunningServer, ServerConfig};
pub use session::{RunState, SessionError, SessionManager, SessionState, StartOptions};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
