//! In-memory platform with a virtual pointer.
//!
//! Used for dry runs (`apc-agent serve --virtual`) on machines without a
//! native implementation, and as the scripted platform in tests. Relative
//! moves update the virtual pointer; `nudge` stands in for the real user.

use super::{Platform, PlatformError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Virtual pointer and idle-prevention state.
#[derive(Debug, Default)]
pub struct VirtualCursor {
    position: Mutex<(i32, i32)>,
    sleep_prevented: AtomicBool,
    moves: AtomicU64,
    keys: AtomicU64,
    fail_moves: AtomicBool,
    fail_reads: AtomicBool,
    fail_sleep: AtomicBool,
}

impl VirtualCursor {
    /// Create a virtual pointer at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a virtual pointer at the given position.
    pub fn at(x: i32, y: i32) -> Self {
        let cursor = Self::new();
        *cursor.lock_position() = (x, y);
        cursor
    }

    /// Move the pointer as a user would (not counted as a simulated move).
    pub fn nudge(&self, dx: i32, dy: i32) {
        let mut pos = self.lock_position();
        pos.0 += dx;
        pos.1 += dy;
    }

    /// Current virtual position, bypassing failure injection.
    pub fn position(&self) -> (i32, i32) {
        *self.lock_position()
    }

    pub fn sleep_prevented(&self) -> bool {
        self.sleep_prevented.load(Ordering::SeqCst)
    }

    /// Number of successful simulated moves.
    pub fn move_count(&self) -> u64 {
        self.moves.load(Ordering::SeqCst)
    }

    pub fn key_count(&self) -> u64 {
        self.keys.load(Ordering::SeqCst)
    }

    /// Make `simulate_move` fail until cleared.
    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    /// Make `cursor_pos` fail until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `prevent_sleep` fail until cleared.
    pub fn set_fail_sleep(&self, fail: bool) {
        self.fail_sleep.store(fail, Ordering::SeqCst);
    }

    fn lock_position(&self) -> std::sync::MutexGuard<'_, (i32, i32)> {
        self.position
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Platform for VirtualCursor {
    fn simulate_move(&self, dx: i32, dy: i32) -> Result<(), PlatformError> {
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("virtual move disabled".into()));
        }
        self.nudge(dx, dy);
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn simulate_key(&self, _code: u16) -> Result<(), PlatformError> {
        self.keys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prevent_sleep(&self, enable: bool) -> Result<(), PlatformError> {
        if self.fail_sleep.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable(
                "virtual sleep toggle disabled".into(),
            ));
        }
        self.sleep_prevented.store(enable, Ordering::SeqCst);
        Ok(())
    }

    fn cursor_pos(&self) -> Result<(i32, i32), PlatformError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("virtual read disabled".into()));
        }
        Ok(self.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moves_update_position() {
        let cursor = VirtualCursor::at(100, 100);
        cursor.simulate_move(-30, 15).unwrap();
        assert_eq!(cursor.cursor_pos().unwrap(), (70, 115));
        assert_eq!(cursor.move_count(), 1);

        cursor.nudge(5, 5);
        assert_eq!(cursor.position(), (75, 120));
        assert_eq!(cursor.move_count(), 1);

        cursor.simulate_key(0x20).unwrap();
        assert_eq!(cursor.key_count(), 1);
    }

    #[test]
    fn test_failure_injection() {
        let cursor = VirtualCursor::new();
        cursor.set_fail_moves(true);
        cursor.set_fail_reads(true);
        assert!(cursor.simulate_move(1, 1).is_err());
        assert!(cursor.cursor_pos().is_err());
        assert_eq!(cursor.position(), (0, 0));

        cursor.set_fail_sleep(true);
        assert!(cursor.prevent_sleep(true).is_err());
        assert!(!cursor.sleep_prevented());
    }
}
