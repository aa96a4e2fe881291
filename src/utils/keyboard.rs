//! Non-blocking keyboard polling for the waiting loops.

use std::io::stdout;
use std::{process, time::Duration};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// Watch the keyboard for half a second and report whether `ESC` was hit.
///
/// The terminal stays in raw mode only for the duration of the poll. Raw mode
/// swallows the usual Ctrl+C signal, so that combination is caught here and
/// turned back into a process exit.
pub(crate) fn poll_escape() -> Result<bool> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let pending = poll(Duration::from_millis(500))?;
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    if !pending {
        return Ok(false);
    }

    // `poll` reported a pending event, so `read` cannot block here.
    match read()? {
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
        }) => process::exit(0),
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => Ok(true),
        _ => Ok(false),
    }
}
