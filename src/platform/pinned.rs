//! Stateful OS toggles pinned to one thread.
//!
//! Some OS state belongs to the calling thread (Windows execution state is
//! the motivating case), while the engine runs on whichever runtime worker
//! picks it up. `PinnedToggle` owns a dedicated thread and forwards every
//! toggle to it, so enable and release always hit the same thread. Dropping
//! the toggle releases a still-enabled state before the thread exits.

use super::PlatformError;
use crossbeam_channel::{bounded, Sender};
use std::thread::{self, JoinHandle};

struct Command {
    enable: bool,
    reply: Sender<Result<(), PlatformError>>,
}

/// A toggle executed on a dedicated thread.
pub struct PinnedToggle {
    commands: Option<Sender<Command>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PinnedToggle {
    /// Spawn the owning thread. `toggle` runs only on that thread.
    pub fn spawn<F>(name: &str, mut toggle: F) -> Result<Self, PlatformError>
    where
        F: FnMut(bool) -> Result<(), PlatformError> + Send + 'static,
    {
        let (sender, receiver) = bounded::<Command>(16);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut enabled = false;
                for command in receiver.iter() {
                    let result = toggle(command.enable);
                    if result.is_ok() {
                        enabled = command.enable;
                    }
                    let _ = command.reply.send(result);
                }
                if enabled {
                    if let Err(e) = toggle(false) {
                        tracing::warn!("Release on toggle shutdown failed: {}", e);
                    }
                }
            })
            .map_err(|e| PlatformError::Os(format!("spawning toggle thread: {e}")))?;

        Ok(Self {
            commands: Some(sender),
            thread_handle: Some(handle),
        })
    }

    /// Apply `enable` on the owning thread and wait for the result.
    pub fn set(&self, enable: bool) -> Result<(), PlatformError> {
        let stopped = || PlatformError::Unavailable("toggle thread stopped".into());
        let commands = self.commands.as_ref().ok_or_else(stopped)?;

        let (reply, response) = bounded(1);
        commands
            .send(Command { enable, reply })
            .map_err(|_| stopped())?;
        response.recv().map_err(|_| stopped())?
    }
}

impl Drop for PinnedToggle {
    fn drop(&mut self) {
        // Closing the channel ends the thread's command loop.
        self.commands.take();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Toggle thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for PinnedToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedToggle")
            .field("running", &self.commands.is_some())
            .finish()
    }
}
