// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Recording context: owns the stdin router and runs recording sessions
//!
//! A [`Recordings`] value replaces process-wide recording state. Build one
//! per controlling terminal, call [`Recordings::initialize_recordings`] once,
//! then [`Recordings::start_recording`] for every session.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::EventType;
use crate::eventer::{EventMiddleware, EventWriter};
use crate::format::RecordingFormat;
use crate::recorder::{Recorder, SessionInfo, SharedRecorder, StreamingRecorder};
use crate::router::{CopyRouter, DialogReader, RouteTarget, SharedWriter, TeeWriter, dialog_pipe};
use crate::terminal::{CrosstermTerminal, RawModeGuard, TermSize, TerminalControl};
use crate::tracker::{PtyTracker, resolve_shell};
use crate::writer::{StreamingFileWriter, WriterConfig};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Where and how recordings are produced
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    /// Root directory; each operation records into a subdirectory
    pub output_dir: PathBuf,
    /// File name hint. Empty means a generated unique name.
    pub file_name: String,
    /// Leading part of generated names
    pub name_prefix: String,
    pub shell: String,
    pub shell_args: Vec<String>,
    pub format: RecordingFormat,
    /// Also record keystrokes sent to the shell
    pub record_input: bool,
    /// Put `SHELL` and `TERM` in the header
    pub capture_env: bool,
    pub sync_each_write: bool,
}

impl RecordingSettings {
    pub fn new(output_dir: impl Into<PathBuf>, shell: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_name: String::new(),
            name_prefix: String::new(),
            shell: shell.into(),
            shell_args: Vec::new(),
            format: RecordingFormat::default(),
            record_input: false,
            capture_env: true,
            sync_each_write: false,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_shell_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_format(mut self, format: RecordingFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_record_input(mut self, record_input: bool) -> Self {
        self.record_input = record_input;
        self
    }

    pub fn with_capture_env(mut self, capture_env: bool) -> Self {
        self.capture_env = capture_env;
        self
    }

    /// Directory a recording for `op_slug` is written into
    pub fn recording_dir(&self, op_slug: &str) -> PathBuf {
        if op_slug.is_empty() {
            self.output_dir.clone()
        } else {
            self.output_dir.join(op_slug)
        }
    }

    fn writer_config(&self) -> WriterConfig {
        WriterConfig::default()
            .with_extension(self.format.extension())
            .with_name_prefix(self.name_prefix.as_str())
            .with_sync_each_write(self.sync_each_write)
    }
}

/// Where the router reads keystrokes from
pub enum RecordingInput {
    /// The process's stdin, polled so the router can be shut down
    Stdin,
    /// Any other byte source
    Reader(Box<dyn Read + Send>),
}

impl std::fmt::Debug for RecordingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingInput::Stdin => f.write_str("Stdin"),
            RecordingInput::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Details of an in-progress or finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOutput {
    pub file_path: PathBuf,
    /// Shell exit status, once it has exited
    pub exit_code: Option<u32>,
    pub event_count: u64,
    pub duration_secs: f64,
}

impl RecordingOutput {
    fn started(file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            exit_code: None,
            event_count: 0,
            duration_secs: 0.0,
        }
    }
}

/// Called once the shell is live, before any input is typed
pub type StartHook = Box<dyn Fn(&RecordingOutput) + Send + Sync>;

/// Clears the active flag when a session ends
struct ActiveSession<'a>(&'a AtomicBool);

impl<'a> ActiveSession<'a> {
    fn begin(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRecording);
        }
        Ok(Self(flag))
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Recording context for one controlling terminal
pub struct Recordings {
    terminal: Arc<dyn TerminalControl>,
    stdout: SharedWriter,
    clock: Arc<dyn Clock>,
    settings: RecordingSettings,
    middleware: Vec<Arc<dyn EventMiddleware>>,
    on_start: Option<StartHook>,
    term_size: TermSize,
    router: Option<CopyRouter>,
    dialog: Option<DialogReader>,
    active: AtomicBool,
}

impl Recordings {
    /// Context over the real terminal and stdout
    pub fn new(settings: RecordingSettings) -> Self {
        Self {
            terminal: Arc::new(CrosstermTerminal),
            stdout: SharedWriter::stdout(),
            clock: Arc::new(SystemClock),
            settings,
            middleware: Vec::new(),
            on_start: None,
            term_size: TermSize::default(),
            router: None,
            dialog: None,
            active: AtomicBool::new(false),
        }
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn TerminalControl>) -> Self {
        self.terminal = terminal;
        self
    }

    /// Where live shell output is shown
    pub fn with_stdout(mut self, stdout: SharedWriter) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append a middleware; middleware runs in the order added
    pub fn with_middleware(mut self, middleware: Arc<dyn EventMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn on_recording_start(mut self, hook: impl Fn(&RecordingOutput) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RecordingSettings {
        &mut self.settings
    }

    pub fn term_size(&self) -> &TermSize {
        &self.term_size
    }

    pub fn is_initialized(&self) -> bool {
        self.router.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current destination of routed input, if initialized
    pub fn route_target(&self) -> Option<RouteTarget> {
        self.router.as_ref().map(CopyRouter::target)
    }

    /// Start routing `input`. Must be called once before any recording.
    pub fn initialize_recordings(&mut self, input: RecordingInput) -> Result<()> {
        if self.router.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let source: Box<dyn Read + Send> = match input {
            #[cfg(unix)]
            RecordingInput::Stdin => Box::new(crate::router::PolledReader::stdin()?),
            #[cfg(not(unix))]
            RecordingInput::Stdin => Box::new(std::io::stdin()),
            RecordingInput::Reader(reader) => reader,
        };

        let (dialog_writer, dialog_reader) = dialog_pipe();
        let router = CopyRouter::spawn(source, dialog_writer)?;
        self.router = Some(router);
        self.dialog = Some(dialog_reader);
        debug!("Recordings initialized");
        Ok(())
    }

    /// Hand out the dialog end of the input pipe. Only the first call gets it.
    pub fn dialog_reader(&mut self) -> Option<DialogReader> {
        self.dialog.take()
    }

    /// Record one shell session into `<output_dir>/<op_slug>`
    ///
    /// The terminal is in raw mode for exactly the lifetime of the session
    /// and is back in its prior mode when this returns, whatever the result.
    pub fn start_recording(&self, op_slug: &str) -> Result<RecordingOutput> {
        let router = self.router.as_ref().ok_or(Error::NotInitialized)?;
        let _active = ActiveSession::begin(&self.active)?;

        let shell = self.settings.shell.as_str();
        resolve_shell(shell).map_err(|e| session_error(shell, e))?;

        let (cols, rows) = self.term_size.refresh_from(&*self.terminal);
        let dir = self.settings.recording_dir(op_slug);
        debug!(dir = %dir.display(), cols, rows, "Starting recording");

        let _raw = RawModeGuard::acquire(&*self.terminal)?;
        self.record(router, &dir, cols, rows)
    }

    fn record(&self, router: &CopyRouter, dir: &Path, cols: u16, rows: u16) -> Result<RecordingOutput> {
        let settings = &self.settings;
        let mut session = SessionInfo::new(&settings.shell, cols, rows);
        if !settings.capture_env {
            session = session.with_env(BTreeMap::new());
        }
        let header = session.metadata(self.clock.now_ns());

        let writer = StreamingFileWriter::create(
            dir,
            &settings.file_name,
            settings.format.formatter(),
            settings.writer_config(),
            &header,
        )
        .map_err(|e| e.context("Unable to create file writer"))?;
        let file_path = writer.filepath().to_path_buf();

        let recorder: SharedRecorder<StreamingRecorder<StreamingFileWriter>> = Arc::new(Mutex::new(
            StreamingRecorder::with_header(writer, self.clock.clone(), header),
        ));

        let output: Box<dyn Write + Send> = Box::new(
            TeeWriter::new()
                .with_sink(self.stdout.clone())
                .with_sink(EventWriter::new(
                    recorder.clone(),
                    EventType::Output,
                    self.middleware.clone(),
                )),
        );
        let input_tap: Option<Box<dyn Write + Send>> = settings.record_input.then(|| {
            Box::new(EventWriter::new(
                recorder.clone(),
                EventType::Input,
                self.middleware.clone(),
            )) as Box<dyn Write + Send>
        });

        let started = RecordingOutput::started(&file_path);
        let exit = PtyTracker::new(cols, rows)
            .run(
                &settings.shell,
                &settings.shell_args,
                router,
                output,
                input_tap,
                || {
                    if let Some(hook) = &self.on_start {
                        hook(&started);
                    }
                },
            )
            .map_err(|e| {
                warn!(path = %file_path.display(), error = %e, "Recording failed, keeping partial file");
                session_error(&settings.shell, e)
            })?;

        let mut recorder = recorder.lock().map_err(|_| Error::Poisoned)?;
        let footer = recorder
            .finish()
            .map_err(|e| e.context("Issue closing file writer"))?;

        info!(
            path = %file_path.display(),
            exit_code = exit.exit_code,
            events = recorder.event_count(),
            "Recording finished"
        );
        Ok(RecordingOutput {
            file_path,
            exit_code: Some(exit.exit_code),
            event_count: footer.event_count.unwrap_or_default(),
            duration_secs: footer.duration_secs.unwrap_or_default(),
        })
    }

    /// Put the terminal back in cooked mode if anything left it raw
    pub fn restore_terminal(&self) -> Result<()> {
        restore_terminal(&*self.terminal)
    }

    /// Stop routing input
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(router) = self.router.take() {
            router.shutdown()?;
        }
        Ok(())
    }
}

/// Leave raw mode on `terminal` if it is in it
pub fn restore_terminal(terminal: &dyn TerminalControl) -> Result<()> {
    if terminal.is_raw_mode()? {
        terminal.disable_raw_mode()?;
        debug!("Terminal restored to cooked mode");
    }
    Ok(())
}

fn session_error(shell: &str, source: Error) -> Error {
    Error::Session {
        shell: shell.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::FakeTerminal;
    use std::io::Cursor;

    fn idle_input() -> RecordingInput {
        RecordingInput::Reader(Box::new(Cursor::new(Vec::new())))
    }

    #[test]
    fn test_start_before_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = Arc::new(FakeTerminal::default());
        let recordings = Recordings::new(RecordingSettings::new(dir.path(), "/bin/sh"))
            .with_terminal(terminal.clone());

        assert!(matches!(recordings.start_recording("op"), Err(Error::NotInitialized)));
        assert_eq!(terminal.enable_count(), 0);
    }

    #[test]
    fn test_initialize_only_once() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let mut recordings = Recordings::new(RecordingSettings::new(dir.path(), "/bin/sh"))
            .with_terminal(Arc::new(FakeTerminal::default()));
        recordings.initialize_recordings(idle_input())?;
        assert!(matches!(
            recordings.initialize_recordings(idle_input()),
            Err(Error::AlreadyInitialized)
        ));
        assert!(recordings.dialog_reader().is_some());
        assert!(recordings.dialog_reader().is_none());
        recordings.shutdown()
    }

    #[test]
    fn test_bad_shell_never_enters_raw_mode() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let terminal = Arc::new(FakeTerminal::default());
        let mut recordings =
            Recordings::new(RecordingSettings::new(dir.path(), "/no/such/shell"))
                .with_terminal(terminal.clone());
        recordings.initialize_recordings(idle_input())?;

        let err = recordings.start_recording("op").unwrap_err();
        assert!(err.to_string().contains("/no/such/shell"));
        assert!(matches!(err, Error::Session { .. }));
        assert_eq!(terminal.enable_count(), 0);
        assert!(!terminal.raw());
        assert!(!recordings.is_recording());
        // No file was created for the failed attempt
        assert!(!dir.path().join("op").exists());
        recordings.shutdown()
    }

    #[test]
    fn test_raw_mode_failure_is_reported() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let terminal = Arc::new(FakeTerminal::default());
        terminal.fail_enable(true);
        let mut recordings = Recordings::new(RecordingSettings::new(dir.path(), "/bin/sh"))
            .with_terminal(terminal.clone());
        recordings.initialize_recordings(idle_input())?;

        assert!(matches!(recordings.start_recording("op"), Err(Error::Terminal(_))));
        assert!(!terminal.raw());
        recordings.shutdown()
    }

    #[test]
    fn test_restore_terminal_only_when_raw() -> Result<()> {
        let cooked = FakeTerminal::default();
        restore_terminal(&cooked)?;
        assert_eq!(cooked.disable_count(), 0);

        let raw = FakeTerminal::default().already_raw();
        restore_terminal(&raw)?;
        assert!(!raw.raw());
        Ok(())
    }

    #[test]
    fn test_recording_dir_per_operation() {
        let settings = RecordingSettings::new("/var/rec", "/bin/sh");
        assert_eq!(settings.recording_dir("op-1"), PathBuf::from("/var/rec/op-1"));
        assert_eq!(settings.recording_dir(""), PathBuf::from("/var/rec"));
        assert_eq!(settings.recording_dir("/tmp/ops/demo"), PathBuf::from("/tmp/ops/demo"));
    }
}
