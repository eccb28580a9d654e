// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! shellcap terminal session recording
//!
//! Wraps an interactive shell in a PTY, shows its output live and streams every
//! I/O chunk to a recording file that stays valid if the process dies midway.
//!
//! Pipeline, leaf first: events -> formatters -> streaming file writer ->
//! recorders -> event writers -> PTY tracker and stdin router -> Recordings.

pub mod clock;
pub mod error;
pub mod event;
pub mod eventer;
pub mod format;
pub mod reader;
pub mod recorder;
pub mod router;
pub mod session;
pub mod terminal;
pub mod tracker;
pub mod writer;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock, now_ns};
pub use error::{Error, Result};
pub use event::{Event, EventType};
pub use eventer::{EventMiddleware, EventWriter, RegexRedactor, apply_middleware};
pub use format::{
    ASCIICAST_VERSION, AsciicastFormatter, AsciicastHeader, Formatter, Metadata, RecordingFormat,
    TypescriptFormatter,
};
pub use reader::{CastEvent, CastReader, CastRecording, CastSummary};
pub use recorder::{MemoryRecorder, Recorder, SessionInfo, SharedRecorder, StreamingRecorder};
pub use router::{
    CaptureBuffer, CopyRouter, DialogReader, DialogWriter, RouteTarget, SharedWriter, TeeWriter,
    dialog_pipe,
};
pub use session::{
    RecordingInput, RecordingOutput, RecordingSettings, Recordings, StartHook, restore_terminal,
};
pub use terminal::{CrosstermTerminal, FakeTerminal, RawModeGuard, TermSize, TerminalControl};
pub use tracker::{PtyExit, PtyTracker, resolve_shell};
pub use writer::{
    NullTerminalWriter, SavedRecording, SavingTerminalWriter, StreamingFileWriter, TerminalWriter,
    WriterConfig,
};
