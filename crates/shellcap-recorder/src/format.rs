// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Recording formats
//!
//! A formatter turns header metadata, individual events and footer metadata
//! into self-contained byte chunks. Each chunk can be appended and flushed on
//! its own, which is what keeps a partially written recording readable.

use crate::error::{Error, Result};
use crate::event::{Event, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// asciicast format version written in the header
pub const ASCIICAST_VERSION: u32 = 2;

/// Metadata describing a recording
///
/// The header form is fixed when recording starts. The footer form is the same
/// value with `duration_secs` and `event_count` filled in at close.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    /// Recording start, nanoseconds since UNIX epoch
    pub start_ns: u64,
    pub command: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Footer only
    pub duration_secs: Option<f64>,
    /// Footer only
    pub event_count: Option<u64>,
}

impl Metadata {
    pub fn start_secs(&self) -> i64 {
        (self.start_ns / 1_000_000_000) as i64
    }

    fn start_datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_nanos(self.start_ns as i64)
    }
}

/// Builds a recording file piece by piece
///
/// Implementations may only keep the relative-timestamp baseline between
/// calls; encoding the same event twice must produce the same bytes.
pub trait Formatter: Send {
    /// Encode the header. Must be called exactly once, before any event.
    fn write_header(&mut self, metadata: &Metadata) -> Result<Vec<u8>>;

    /// Encode a single event as an appendable chunk
    fn write_event(&self, event: &Event) -> Result<Vec<u8>>;

    /// Encode trailing bytes. May be empty for line-oriented formats.
    fn write_footer(&self, metadata: &Metadata) -> Result<Vec<u8>>;
}

/// Available on-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// asciicast v2 JSON lines
    #[default]
    Asciicast,
    /// `script`-style raw typescript
    Typescript,
}

impl RecordingFormat {
    pub fn formatter(self) -> Box<dyn Formatter> {
        match self {
            RecordingFormat::Asciicast => Box::new(AsciicastFormatter::new()),
            RecordingFormat::Typescript => Box::new(TypescriptFormatter::new()),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            RecordingFormat::Asciicast => "cast",
            RecordingFormat::Typescript => "log",
        }
    }
}

impl std::fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingFormat::Asciicast => write!(f, "asciicast"),
            RecordingFormat::Typescript => write!(f, "typescript"),
        }
    }
}

impl std::str::FromStr for RecordingFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asciicast" | "cast" => Ok(RecordingFormat::Asciicast),
            "typescript" | "script" => Ok(RecordingFormat::Typescript),
            _ => Err(format!(
                "Invalid recording format: {}. Use 'asciicast' or 'typescript'",
                s
            )),
        }
    }
}

/// asciicast v2 header line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsciicastHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// asciicast v2 encoder: a JSON header line followed by one
/// `[seconds, "o"|"i", "data"]` line per event. No footer.
#[derive(Debug, Default)]
pub struct AsciicastFormatter {
    start_ns: Option<u64>,
}

impl AsciicastFormatter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Formatter for AsciicastFormatter {
    fn write_header(&mut self, metadata: &Metadata) -> Result<Vec<u8>> {
        if self.start_ns.is_some() {
            return Err(Error::HeaderAlreadyWritten);
        }

        let header = AsciicastHeader {
            version: if metadata.version == 0 {
                ASCIICAST_VERSION
            } else {
                metadata.version
            },
            width: metadata.width,
            height: metadata.height,
            timestamp: metadata.start_secs(),
            command: metadata.command.clone(),
            env: metadata.env.clone(),
        };

        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        self.start_ns = Some(metadata.start_ns);
        Ok(line)
    }

    fn write_event(&self, event: &Event) -> Result<Vec<u8>> {
        let start_ns = self.start_ns.ok_or(Error::HeaderNotWritten)?;
        let offset = relative_secs(start_ns, event.ts_ns());
        let data = String::from_utf8_lossy(event.data());

        let mut line = serde_json::to_vec(&(offset, event.event_type().code(), data))?;
        line.push(b'\n');
        Ok(line)
    }

    fn write_footer(&self, _metadata: &Metadata) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Seconds between `start_ns` and `ts_ns`, at microsecond precision.
/// Events stamped before the start collapse to zero.
pub fn relative_secs(start_ns: u64, ts_ns: u64) -> f64 {
    let micros = ts_ns.saturating_sub(start_ns) / 1_000;
    micros as f64 / 1_000_000.0
}

/// Raw typescript in the style of `script(1)`
///
/// Output bytes are written verbatim between a "Script started" line and a
/// "Script done" trailer. Input events are not part of a typescript.
#[derive(Debug, Default)]
pub struct TypescriptFormatter {
    header_written: bool,
}

impl TypescriptFormatter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Formatter for TypescriptFormatter {
    fn write_header(&mut self, metadata: &Metadata) -> Result<Vec<u8>> {
        if self.header_written {
            return Err(Error::HeaderAlreadyWritten);
        }
        self.header_written = true;

        let mut fields = Vec::new();
        if let Some(command) = &metadata.command {
            fields.push(format!("COMMAND=\"{}\"", command));
        }
        if let Some(term) = metadata.env.get("TERM") {
            fields.push(format!("TERM=\"{}\"", term));
        }
        fields.push(format!("COLUMNS=\"{}\"", metadata.width));
        fields.push(format!("LINES=\"{}\"", metadata.height));

        Ok(format!(
            "Script started on {} [{}]\n",
            metadata.start_datetime().format("%Y-%m-%d %H:%M:%S%:z"),
            fields.join(" ")
        )
        .into_bytes())
    }

    fn write_event(&self, event: &Event) -> Result<Vec<u8>> {
        if !self.header_written {
            return Err(Error::HeaderNotWritten);
        }
        match event.event_type() {
            EventType::Output => Ok(event.data().to_vec()),
            EventType::Input => Ok(Vec::new()),
        }
    }

    fn write_footer(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        let duration = metadata.duration_secs.unwrap_or(0.0);
        let end_ns = metadata.start_ns + (duration * 1_000_000_000.0) as u64;
        let end = DateTime::<Utc>::from_timestamp_nanos(end_ns as i64);

        Ok(format!(
            "\nScript done on {} [duration {:.3}s, {} events]\n",
            end.format("%Y-%m-%d %H:%M:%S%:z"),
            duration,
            metadata.event_count.unwrap_or(0)
        )
        .into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 1_700_000_000_000_000_000;

    fn header_metadata() -> Metadata {
        let mut env = BTreeMap::new();
        env.insert("SHELL".to_string(), "/bin/bash".to_string());
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        Metadata {
            version: ASCIICAST_VERSION,
            width: 120,
            height: 40,
            start_ns: START,
            command: Some("/bin/bash".to_string()),
            env,
            ..Default::default()
        }
    }

    #[test]
    fn test_asciicast_header_is_one_json_line() -> Result<()> {
        let mut formatter = AsciicastFormatter::new();
        let bytes = formatter.write_header(&header_metadata())?;

        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);

        let header: AsciicastHeader = serde_json::from_slice(&bytes)?;
        assert_eq!(header.version, 2);
        assert_eq!(header.width, 120);
        assert_eq!(header.height, 40);
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.command.as_deref(), Some("/bin/bash"));
        assert_eq!(header.env.get("TERM").map(String::as_str), Some("xterm-256color"));
        Ok(())
    }

    #[test]
    fn test_asciicast_header_only_once() -> Result<()> {
        let mut formatter = AsciicastFormatter::new();
        formatter.write_header(&header_metadata())?;
        assert!(matches!(
            formatter.write_header(&header_metadata()),
            Err(Error::HeaderAlreadyWritten)
        ));
        Ok(())
    }

    #[test]
    fn test_asciicast_event_relative_timestamp() -> Result<()> {
        let mut formatter = AsciicastFormatter::new();
        formatter.write_header(&header_metadata())?;

        let evt = Event::new(EventType::Output, b"hello\r\n".to_vec(), START + 1_500_000_000);
        let line = String::from_utf8(formatter.write_event(&evt)?).unwrap();
        assert_eq!(line, "[1.5,\"o\",\"hello\\r\\n\"]\n");

        let input = Event::new(EventType::Input, b"l".to_vec(), START + 250_000);
        let line = String::from_utf8(formatter.write_event(&input)?).unwrap();
        assert_eq!(line, "[0.00025,\"i\",\"l\"]\n");
        Ok(())
    }

    #[test]
    fn test_asciicast_event_encoding_is_repeatable() -> Result<()> {
        let mut formatter = AsciicastFormatter::new();
        formatter.write_header(&header_metadata())?;

        let evt = Event::new(EventType::Output, "\u{1b}[1mbold\u{1b}[0m", START + 42);
        let same = evt.clone();
        assert_eq!(formatter.write_event(&evt)?, formatter.write_event(&same)?);
        Ok(())
    }

    #[test]
    fn test_asciicast_event_before_header_fails() {
        let formatter = AsciicastFormatter::new();
        let evt = Event::new(EventType::Output, b"x".to_vec(), START);
        assert!(matches!(formatter.write_event(&evt), Err(Error::HeaderNotWritten)));
    }

    #[test]
    fn test_asciicast_footer_is_empty() -> Result<()> {
        let formatter = AsciicastFormatter::new();
        assert!(formatter.write_footer(&header_metadata())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_event_before_start_clamps_to_zero() {
        assert_eq!(relative_secs(START, START - 10), 0.0);
    }

    #[test]
    fn test_typescript_layout() -> Result<()> {
        let mut formatter = TypescriptFormatter::new();
        let header = String::from_utf8(formatter.write_header(&header_metadata())?).unwrap();
        assert!(header.starts_with("Script started on 2023-11-14"));
        assert!(header.contains("COMMAND=\"/bin/bash\""));
        assert!(header.contains("COLUMNS=\"120\" LINES=\"40\""));

        let out = Event::new(EventType::Output, b"$ ".to_vec(), START);
        let typed = Event::new(EventType::Input, b"ls".to_vec(), START);
        assert_eq!(formatter.write_event(&out)?, b"$ ");
        assert!(formatter.write_event(&typed)?.is_empty());

        let footer = Metadata {
            duration_secs: Some(2.0),
            event_count: Some(7),
            ..header_metadata()
        };
        let trailer = String::from_utf8(formatter.write_footer(&footer)?).unwrap();
        assert!(trailer.starts_with("\nScript done on "));
        assert!(trailer.contains("[duration 2.000s, 7 events]"));
        Ok(())
    }

    #[test]
    fn test_recording_format_parse() {
        assert_eq!("asciicast".parse(), Ok(RecordingFormat::Asciicast));
        assert_eq!("Typescript".parse(), Ok(RecordingFormat::Typescript));
        assert!("gif".parse::<RecordingFormat>().is_err());
        assert_eq!(RecordingFormat::Typescript.extension(), "log");
    }
}
