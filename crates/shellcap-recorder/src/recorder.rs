// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Recorders keep the bookkeeping for a session (start time, event count,
//! duration) and hand encoded events on to a TerminalWriter.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event::{Event, EventType};
use crate::format::{ASCIICAST_VERSION, Metadata};
use crate::writer::TerminalWriter;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Environment variables copied into the recording header
pub const CAPTURED_ENV: &[&str] = &["SHELL", "TERM"];

/// Tracks I/O events for one recording session
pub trait Recorder: Send {
    /// Current time according to the recorder's clock
    fn now_ns(&self) -> u64;

    /// Record one chunk
    fn add_event(&mut self, event_type: EventType, data: Vec<u8>, ts_ns: u64) -> Result<()>;

    fn event_count(&self) -> u64;

    /// Seconds elapsed since the recorder was created
    fn duration_secs(&self) -> f64;

    /// Start of the recording, seconds since UNIX epoch
    fn start_time(&self) -> i64;

    /// Dump what this recorder knows into `writer`
    fn output(&mut self, writer: &mut dyn TerminalWriter) -> Result<()>;
}

/// A recorder shared between the input and output event writers
pub type SharedRecorder<R> = Arc<Mutex<R>>;

/// Terminal facts captured when a recording starts
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub shell: String,
    pub width: u16,
    pub height: u16,
    pub env: BTreeMap<String, String>,
}

impl SessionInfo {
    /// Capture [`CAPTURED_ENV`] from the process environment, with `SHELL`
    /// pointing at the recorded shell
    pub fn new(shell: &str, width: u16, height: u16) -> Self {
        let mut env: BTreeMap<String, String> = CAPTURED_ENV
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        env.insert("SHELL".to_string(), shell.to_string());

        Self {
            shell: shell.to_string(),
            width,
            height,
            env,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Header metadata for a recording starting at `start_ns`
    pub fn metadata(&self, start_ns: u64) -> Metadata {
        Metadata {
            version: ASCIICAST_VERSION,
            width: self.width,
            height: self.height,
            start_ns,
            command: Some(self.shell.clone()),
            env: self.env.clone(),
            duration_secs: None,
            event_count: None,
        }
    }
}

fn elapsed_secs(start_ns: u64, now_ns: u64) -> f64 {
    now_ns.saturating_sub(start_ns) as f64 / 1_000_000_000.0
}

/// Forwards every event to its writer as soon as it arrives
pub struct StreamingRecorder<W: TerminalWriter> {
    writer: W,
    clock: Arc<dyn Clock>,
    header: Metadata,
    event_count: u64,
    finished: bool,
}

impl<W: TerminalWriter> StreamingRecorder<W> {
    /// Capture the start time from `clock` and write the header right away
    pub fn new(mut writer: W, clock: Arc<dyn Clock>, session: &SessionInfo) -> Result<Self> {
        let header = session.metadata(clock.now_ns());
        writer.write_header(&header)?;
        Ok(Self::with_header(writer, clock, header))
    }

    /// Adopt a writer that already holds `header`, such as a
    /// [`StreamingFileWriter`](crate::writer::StreamingFileWriter)
    pub fn with_header(writer: W, clock: Arc<dyn Clock>, header: Metadata) -> Self {
        debug!(
            command = header.command.as_deref().unwrap_or_default(),
            width = header.width,
            height = header.height,
            "Started streaming recorder"
        );

        Self {
            writer,
            clock,
            header,
            event_count: 0,
            finished: false,
        }
    }

    /// Header plus duration and event count as of now
    pub fn footer(&self) -> Metadata {
        Metadata {
            duration_secs: Some(self.duration_secs()),
            event_count: Some(self.event_count),
            ..self.header.clone()
        }
    }

    /// Write the footer and close the writer
    pub fn finish(&mut self) -> Result<Metadata> {
        if self.finished {
            return Err(Error::WriterClosed);
        }
        let footer = self.footer();
        self.finished = true;
        self.writer.close(&footer)?;

        debug!(
            events = self.event_count,
            duration_secs = footer.duration_secs.unwrap_or_default(),
            "Finished streaming recorder"
        );
        Ok(footer)
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: TerminalWriter> Recorder for StreamingRecorder<W> {
    fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    fn add_event(&mut self, event_type: EventType, data: Vec<u8>, ts_ns: u64) -> Result<()> {
        if self.finished {
            return Err(Error::WriterClosed);
        }
        self.event_count += 1;
        let event = Event::new(event_type, data, ts_ns);
        trace!(kind = event_type.code(), bytes = event.data().len(), "Recording event");
        self.writer.write_event(&event)
    }

    fn event_count(&self) -> u64 {
        self.event_count
    }

    fn duration_secs(&self) -> f64 {
        elapsed_secs(self.header.start_ns, self.clock.now_ns())
    }

    fn start_time(&self) -> i64 {
        self.header.start_secs()
    }

    /// Events have already been streamed out, so only the metadata is dumped
    fn output(&mut self, writer: &mut dyn TerminalWriter) -> Result<()> {
        writer.write_header(&self.header)?;
        writer.close(&self.footer())
    }
}

/// Keeps every event in memory until [`Recorder::output`] replays them
pub struct MemoryRecorder {
    clock: Arc<dyn Clock>,
    header: Metadata,
    events: Vec<Event>,
}

impl MemoryRecorder {
    pub fn new(clock: Arc<dyn Clock>, session: &SessionInfo) -> Self {
        let header = session.metadata(clock.now_ns());
        Self {
            clock,
            header,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Concatenated payload of every event of `event_type`
    pub fn bytes_of(&self, event_type: EventType) -> Vec<u8> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .flat_map(|e| e.data().iter().copied())
            .collect()
    }
}

impl Recorder for MemoryRecorder {
    fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    fn add_event(&mut self, event_type: EventType, data: Vec<u8>, ts_ns: u64) -> Result<()> {
        self.events.push(Event::new(event_type, data, ts_ns));
        Ok(())
    }

    fn event_count(&self) -> u64 {
        self.events.len() as u64
    }

    fn duration_secs(&self) -> f64 {
        elapsed_secs(self.header.start_ns, self.clock.now_ns())
    }

    fn start_time(&self) -> i64 {
        self.header.start_secs()
    }

    fn output(&mut self, writer: &mut dyn TerminalWriter) -> Result<()> {
        writer.write_header(&self.header)?;
        for event in &self.events {
            writer.write_event(event)?;
        }
        writer.close(&Metadata {
            duration_secs: Some(self.duration_secs()),
            event_count: Some(self.event_count()),
            ..self.header.clone()
        })
    }
}
