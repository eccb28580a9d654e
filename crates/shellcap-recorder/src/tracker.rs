// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Runs one shell inside a PTY, wired between the stdin router and an output sink
//!
//! Lifecycle of a run: resolve the shell, open the PTY, spawn, attach the PTY
//! writer to the router, copy PTY output into the sink on a background thread,
//! wait for the shell, detach, drain the remaining output.

use crate::error::{Error, Result};
use crate::router::{CopyRouter, TeeWriter, copy_chunks};
use portable_pty::{ChildKiller, CommandBuilder, PtySize, native_pty_system};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, info, warn};

/// Resolve `shell` to an executable path
pub fn resolve_shell(shell: &str) -> Result<PathBuf> {
    if shell.trim().is_empty() {
        return Err(Error::ShellNotFound {
            shell: shell.to_string(),
        });
    }
    which::which(shell).map_err(|e| {
        debug!(shell, error = %e, "Shell lookup failed");
        Error::ShellNotFound {
            shell: shell.to_string(),
        }
    })
}

/// How a tracked shell ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyExit {
    pub exit_code: u32,
    /// Bytes the shell wrote to the PTY
    pub output_bytes: u64,
}

/// Keeps the shell attached to the router until dropped
struct ShellAttachment<'a> {
    router: &'a CopyRouter,
}

impl<'a> ShellAttachment<'a> {
    fn attach(router: &'a CopyRouter, writer: Box<dyn Write + Send>) -> Self {
        router.attach_shell(writer);
        Self { router }
    }
}

impl Drop for ShellAttachment<'_> {
    fn drop(&mut self) {
        self.router.detach_shell();
    }
}

/// Copy of routed input for the recording
///
/// The first failed write is kept for [`PtyTracker::run`] to report, and the
/// shell is stopped since its input can no longer be recorded.
struct InputTap {
    inner: Box<dyn Write + Send>,
    failure: Arc<Mutex<Option<io::Error>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl InputTap {
    fn fail(&mut self, err: io::Error) -> io::Error {
        error!(error = %err, "Recording shell input failed, stopping shell");
        let returned = io::Error::new(err.kind(), err.to_string());
        let mut failure = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        if failure.is_none() {
            *failure = Some(err);
            if let Err(e) = self.killer.kill() {
                warn!(error = %e, "Failed to stop shell");
            }
        }
        returned
    }
}

impl Write for InputTap {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write_all(buf).and_then(|()| self.inner.flush()) {
            Ok(()) => Ok(buf.len()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| self.fail(e))
    }
}

/// Spawns and supervises the recorded shell
#[derive(Debug, Clone)]
pub struct PtyTracker {
    cols: u16,
    rows: u16,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl PtyTracker {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Extra environment for the shell
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run `shell` until it exits
    ///
    /// Stdin arrives through `router`; with `input_tap` set, routed input is
    /// also written there. PTY output goes to `output`. `on_start` runs once
    /// the shell is live. A shell that exits, whatever its status, is a
    /// normal end of the session. A failure of `output` or `input_tap` stops
    /// the shell and is returned.
    pub fn run<F>(
        &self,
        shell: &str,
        args: &[String],
        router: &CopyRouter,
        output: Box<dyn Write + Send>,
        input_tap: Option<Box<dyn Write + Send>>,
        on_start: F,
    ) -> Result<PtyExit>
    where
        F: FnOnce(),
    {
        let program = resolve_shell(shell)?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::pty(e).context("Failed to create PTY"))?;

        let mut cmd = CommandBuilder::new(&program);
        cmd.args(args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = self.cwd.clone().or_else(|| std::env::current_dir().ok()) {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::pty(e).context("Failed to spawn shell in PTY"))?;
        // Only the child may hold the slave, or the reader never sees EOF
        drop(pair.slave);

        info!(
            shell = %program.display(),
            cols = self.cols,
            rows = self.rows,
            pid = ?child.process_id(),
            "Spawned shell in PTY"
        );

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::pty(e).context("Failed to create PTY reader"))?;
        let pty_writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::pty(e).context("Failed to take PTY writer"))?;

        let tap_failure = Arc::new(Mutex::new(None));
        let shell_input: Box<dyn Write + Send> = match input_tap {
            Some(tap) => Box::new(TeeWriter::new().with_sink(pty_writer).with_sink(InputTap {
                inner: tap,
                failure: tap_failure.clone(),
                killer: child.clone_killer(),
            })),
            None => pty_writer,
        };
        let attachment = ShellAttachment::attach(router, shell_input);

        let mut killer = child.clone_killer();
        let mut output = output;
        let output_thread = thread::Builder::new()
            .name("shellcap-pty-output".to_string())
            .spawn(move || {
                let copied = copy_chunks(&mut *reader, &mut *output);
                if let Err(e) = &copied {
                    // Stop the shell so the wait below cannot hang on a dead sink
                    error!(error = %e, "PTY output copy failed, stopping shell");
                    if let Err(e) = killer.kill() {
                        warn!(error = %e, "Failed to stop shell");
                    }
                }
                copied
            });
        let output_thread = match output_thread {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::from(e).context("Failed to start PTY output thread"));
            }
        };

        on_start();

        let status = child.wait();
        drop(attachment);
        let status = status.map_err(|e| Error::from(e).context("Failed to wait for shell"))?;
        debug!(exit_code = status.exit_code(), "Shell exited, draining output");

        let copied = output_thread
            .join()
            .map_err(|_| Error::pty("PTY output thread panicked"))?;
        drop(pair.master);

        let tap_failure = tap_failure.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(e) = tap_failure {
            return Err(Error::from(e).context("Failed to record shell input"));
        }
        let output_bytes =
            copied.map_err(|e| Error::from(e).context("Failed to copy shell output"))?;

        Ok(PtyExit {
            exit_code: status.exit_code(),
            output_bytes,
        })
    }
}
