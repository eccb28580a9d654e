// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the recording pipeline

use thiserror::Error;

/// Result type alias for recording operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a recording
#[derive(Debug, Error)]
pub enum Error {
    #[error("Recordings have not been initialized")]
    NotInitialized,

    #[error("Recordings have already been initialized")]
    AlreadyInitialized,

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Recording header has already been written")]
    HeaderAlreadyWritten,

    #[error("Recording header has not been written yet")]
    HeaderNotWritten,

    #[error("Recording writer is already closed")]
    WriterClosed,

    #[error("Shell not found: \"{shell}\"")]
    ShellNotFound { shell: String },

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Terminal mode error: {0}")]
    Terminal(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid redaction pattern: {0}")]
    InvalidPattern(String),

    #[error("Malformed recording at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Unable to start the recording, shell path: \"{shell}\": {source}")]
    Session {
        shell: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Recorder lock poisoned")]
    Poisoned,
}

impl Error {
    /// Wrap this error with a short description of the failing stage
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn pty(err: impl std::fmt::Display) -> Self {
        Error::Pty(format!("{:#}", err))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io) => io,
            other => std::io::Error::other(other),
        }
    }
}
