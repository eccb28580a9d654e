// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Real-terminal control: raw mode, size queries and the scoped raw-mode guard.
//!
//! Raw mode is only ever entered through [`RawModeGuard`], which puts the
//! terminal back the way it found it when dropped. That covers normal
//! returns, early `?` returns and unwinding alike.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use tracing::{debug, error};

/// Fallback dimensions when the terminal cannot be queried
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Operations the recorder needs from the controlling terminal
pub trait TerminalControl: Send + Sync {
    fn is_raw_mode(&self) -> Result<bool>;

    fn enable_raw_mode(&self) -> Result<()>;

    fn disable_raw_mode(&self) -> Result<()>;

    /// Current `(cols, rows)`, if there is a terminal to ask
    fn size(&self) -> Option<(u16, u16)>;
}

/// The process's controlling terminal, driven through crossterm
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl TerminalControl for CrosstermTerminal {
    fn is_raw_mode(&self) -> Result<bool> {
        crossterm::terminal::is_raw_mode_enabled().map_err(Error::Terminal)
    }

    fn enable_raw_mode(&self) -> Result<()> {
        crossterm::terminal::enable_raw_mode().map_err(Error::Terminal)
    }

    fn disable_raw_mode(&self) -> Result<()> {
        crossterm::terminal::disable_raw_mode().map_err(Error::Terminal)
    }

    fn size(&self) -> Option<(u16, u16)> {
        crossterm::terminal::size().ok().filter(|(c, r)| *c > 0 && *r > 0)
    }
}

/// In-memory terminal for tests
///
/// Counts mode switches and can be told to fail entering raw mode.
#[derive(Debug)]
pub struct FakeTerminal {
    raw: AtomicBool,
    fail_enable: AtomicBool,
    enables: AtomicUsize,
    disables: AtomicUsize,
    cols: u16,
    rows: u16,
}

impl FakeTerminal {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            raw: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
            cols,
            rows,
        }
    }

    /// Start out already in raw mode
    pub fn already_raw(self) -> Self {
        self.raw.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self) -> bool {
        self.raw.load(Ordering::SeqCst)
    }

    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl Default for FakeTerminal {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl TerminalControl for FakeTerminal {
    fn is_raw_mode(&self) -> Result<bool> {
        Ok(self.raw())
    }

    fn enable_raw_mode(&self) -> Result<()> {
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(Error::Terminal(std::io::Error::other("not a terminal")));
        }
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.raw.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_raw_mode(&self) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.raw.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> Option<(u16, u16)> {
        Some((self.cols, self.rows))
    }
}

/// Holds the terminal in raw mode for as long as it lives
#[must_use = "raw mode is restored as soon as the guard is dropped"]
pub struct RawModeGuard<'a> {
    terminal: &'a dyn TerminalControl,
    was_raw: bool,
}

impl<'a> RawModeGuard<'a> {
    /// Enter raw mode, remembering the prior state
    pub fn acquire(terminal: &'a dyn TerminalControl) -> Result<Self> {
        let was_raw = terminal.is_raw_mode()?;
        if !was_raw {
            terminal.enable_raw_mode()?;
        }
        debug!(was_raw, "Entered raw mode");
        Ok(Self { terminal, was_raw })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if self.was_raw {
            return;
        }
        if let Err(e) = self.terminal.disable_raw_mode() {
            error!(error = %e, "Failed to restore terminal mode");
        } else {
            debug!("Restored terminal mode");
        }
    }
}

/// Terminal dimensions shared with the header writer
///
/// Dimensions are captured once when a recording starts. The update methods
/// are the hook for a resize handler; nothing calls them mid-session today.
#[derive(Debug)]
pub struct TermSize {
    width: AtomicU16,
    height: AtomicU16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            width: AtomicU16::new(DEFAULT_COLS),
            height: AtomicU16::new(DEFAULT_ROWS),
        }
    }
}

impl TermSize {
    pub fn update_width(&self, cols: u16) {
        self.width.store(cols, Ordering::Release);
    }

    pub fn update_height(&self, rows: u16) {
        self.height.store(rows, Ordering::Release);
    }

    pub fn width(&self) -> u16 {
        self.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u16 {
        self.height.load(Ordering::Acquire)
    }

    /// Refresh from `terminal`, keeping the previous values if it has no size
    pub fn refresh_from(&self, terminal: &dyn TerminalControl) -> (u16, u16) {
        if let Some((cols, rows)) = terminal.size() {
            self.update_width(cols);
            self.update_height(rows);
        }
        (self.width(), self.height())
    }
}
