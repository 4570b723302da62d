//! Windows platform using Win32 input and power APIs.
//!
//! Relative moves and key presses go through `SendInput`, idle prevention
//! through `SetThreadExecutionState`, and pointer reads through
//! `GetCursorPos`. Execution state is per-thread, so it is always set from
//! one dedicated thread.

use super::{PinnedToggle, Platform, PlatformError};
use windows::Win32::Foundation::POINT;
use windows::Win32::System::Power::{
    SetThreadExecutionState, ES_CONTINUOUS, ES_DISPLAY_REQUIRED, ES_SYSTEM_REQUIRED,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, MOUSEEVENTF_MOVE, MOUSEINPUT, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;

/// Native Windows platform.
#[derive(Debug)]
pub struct WindowsPlatform {
    power: PinnedToggle,
}

impl WindowsPlatform {
    pub fn new() -> Result<Self, PlatformError> {
        let power = PinnedToggle::spawn("apc-power", set_execution_state)?;
        Ok(Self { power })
    }
}

fn set_execution_state(enable: bool) -> Result<(), PlatformError> {
    let flags = if enable {
        ES_CONTINUOUS | ES_SYSTEM_REQUIRED | ES_DISPLAY_REQUIRED
    } else {
        ES_CONTINUOUS
    };
    // SAFETY: plain flag argument, no pointers involved.
    let previous = unsafe { SetThreadExecutionState(flags) };
    if previous.0 == 0 {
        return Err(PlatformError::Os(format!(
            "SetThreadExecutionState failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn send(inputs: &[INPUT]) -> Result<(), PlatformError> {
    // SAFETY: `inputs` is a valid slice of initialised INPUT structures and
    // the size argument matches the element type.
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(PlatformError::Os(format!(
            "SendInput failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn key_input(code: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(code),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

impl Platform for WindowsPlatform {
    fn simulate_move(&self, dx: i32, dy: i32) -> Result<(), PlatformError> {
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: 0,
                    dwFlags: MOUSEEVENTF_MOVE,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        send(&[input])
    }

    fn simulate_key(&self, code: u16) -> Result<(), PlatformError> {
        send(&[
            key_input(code, KEYBD_EVENT_FLAGS(0)),
            key_input(code, KEYEVENTF_KEYUP),
        ])
    }

    fn prevent_sleep(&self, enable: bool) -> Result<(), PlatformError> {
        self.power.set(enable)
    }

    fn cursor_pos(&self) -> Result<(i32, i32), PlatformError> {
        let mut point = POINT::default();
        // SAFETY: `point` is a valid, writable POINT for the duration of the call.
        unsafe { GetCursorPos(&mut point) }
            .map_err(|e| PlatformError::Os(format!("GetCursorPos failed: {e}")))?;
        Ok((point.x, point.y))
    }
}
