//! Platform capabilities used by the presence engine.
//!
//! A platform supplies four OS-level primitives: a relative pointer move, a
//! key press, the "keep the machine awake" toggle, and a pointer position
//! read. The engine treats the platform as optional: when none is available
//! (cloud VMs, unsupported OSes) it still runs and records what it would have
//! done, without touching the host.

pub mod pinned;
pub mod virtual_cursor;

#[cfg(target_os = "windows")]
pub mod windows;

use std::sync::Arc;

pub use pinned::PinnedToggle;
pub use virtual_cursor::VirtualCursor;

/// OS hooks the engine drives.
///
/// Implementations must be cheap to call from an async task: every method is
/// expected to return promptly and never block on user interaction.
pub trait Platform: Send + Sync {
    /// Move the pointer by a relative displacement.
    fn simulate_move(&self, dx: i32, dy: i32) -> Result<(), PlatformError>;

    /// Press and release a single key identified by its virtual key code.
    fn simulate_key(&self, code: u16) -> Result<(), PlatformError>;

    /// Enable or disable idle/sleep prevention.
    fn prevent_sleep(&self, enable: bool) -> Result<(), PlatformError>;

    /// Current pointer position in screen coordinates.
    fn cursor_pos(&self) -> Result<(i32, i32), PlatformError>;
}

/// Optional platform handle. `None` means headless operation.
pub type SharedPlatform = Option<Arc<dyn Platform>>;

/// Errors reported by platform hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// No native implementation exists for this OS.
    Unsupported,
    /// An OS call failed.
    Os(String),
    /// The capability exists but is currently disabled or failing.
    Unavailable(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Unsupported => write!(f, "platform not implemented for this OS"),
            PlatformError::Os(e) => write!(f, "OS call failed: {e}"),
            PlatformError::Unavailable(e) => write!(f, "platform unavailable: {e}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Return the native platform for the running OS.
#[cfg(target_os = "windows")]
pub fn native() -> Result<Arc<dyn Platform>, PlatformError> {
    Ok(Arc::new(self::windows::WindowsPlatform::new()?))
}

/// Return the native platform for the running OS.
///
/// Only Windows has an implementation; elsewhere the agent runs headless.
#[cfg(not(target_os = "windows"))]
pub fn native() -> Result<Arc<dyn Platform>, PlatformError> {
    Err(PlatformError::Unsupported)
}

/// Choose the platform for this process.
///
/// Cloud mode always runs headless. Otherwise the virtual cursor is used when
/// requested, then the native platform; when neither is available the agent
/// falls back to headless operation.
pub fn select(cloud_mode: bool, use_virtual: bool) -> SharedPlatform {
    if cloud_mode {
        tracing::info!("Running in cloud mode (pointer movement disabled)");
        return None;
    }
    if use_virtual {
        tracing::info!("Using virtual cursor platform");
        return Some(Arc::new(VirtualCursor::new()));
    }
    match native() {
        Ok(platform) => Some(platform),
        Err(e) => {
            tracing::warn!("Platform init warning: {}; running headless", e);
            None
        }
    }
}

/// Manhattan distance between two pointer positions.
pub fn manhattan(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}
