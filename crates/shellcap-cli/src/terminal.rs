// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-level terminal restoration
//!
//! Recording sessions restore the terminal through a scoped guard. These
//! handlers cover the exits a guard never sees: termination signals and
//! panics with `panic = "abort"`.

use anyhow::Context;
use shellcap_recorder::{CrosstermTerminal, TerminalControl, restore_terminal};
use std::panic;

/// Conventional exit status after SIGINT
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Install the signal handler and panic hook. Call once, at startup.
pub fn install_restore_handlers() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        restore_quietly(&CrosstermTerminal);
        tracing::info!("Terminated by signal");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .context("Error setting termination signal handler")?;

    let default_panic = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        restore_quietly(&CrosstermTerminal);
        default_panic(panic_info);
    }));

    Ok(())
}

/// Leave raw mode if needed, logging instead of failing
pub fn restore_quietly(terminal: &dyn TerminalControl) {
    if let Err(err) = restore_terminal(terminal) {
        tracing::warn!(error = %err, "Failed to restore terminal");
    }
}
