//! Operator commands from the controlling terminal.
//!
//! The terminal is switched to raw mode so single key presses arrive without
//! Enter. The guard restores it on drop and from a panic hook.

use crate::capture_loop::{Command, CommandSource};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Map a key press to the command it stands for.
///
/// `s` saves, `Esc`, `q` and `Ctrl+C` quit. Raw mode swallows SIGINT, so
/// `Ctrl+C` has to be handled here.
pub fn command_for_key(key: KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') => Some(Command::Quit),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Command::Save),
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Some(Command::Quit),
        _ => None,
    }
}

/// Reads commands from the terminal for as long as it is alive.
pub struct TerminalCommands {
    active: bool,
}

impl TerminalCommands {
    pub fn enter() -> io::Result<Self> {
        install_panic_hook();

        enable_raw_mode()?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);

        Ok(Self { active: true })
    }
}

impl CommandSource for TerminalCommands {
    fn poll(&mut self, timeout: Duration) -> io::Result<Option<Command>> {
        // At most one event per tick
        if !event::poll(timeout)? {
            return Ok(None);
        }

        match event::read()? {
            Event::Key(key) => Ok(command_for_key(key)),
            _ => Ok(None),
        }
    }
}

impl Drop for TerminalCommands {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            let _ = disable_raw_mode();
        }
    }
}

/// Log writer for stderr that keeps lines at the left margin in raw mode.
///
/// Raw mode turns off the terminal's `\n` to `\r\n` translation, so the
/// writer does it instead while raw mode is on.
pub struct LogWriter<W> {
    inner: W,
    raw: bool,
}

impl<W: io::Write> LogWriter<W> {
    pub fn new(inner: W, raw: bool) -> Self {
        Self { inner, raw }
    }
}

/// `MakeWriter` for the subscriber: samples the raw-mode flag per event.
pub fn log_writer() -> LogWriter<io::Stderr> {
    LogWriter::new(io::stderr(), RAW_MODE_ACTIVE.load(Ordering::SeqCst))
}

impl<W: io::Write> io::Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw {
            return self.inner.write(buf);
        }

        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' && (i == 0 || buf[i - 1] != b'\r') {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn install_panic_hook() {
    static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
            let _ = disable_raw_mode();
        }
        original_hook(panic_info);
    }));
}
