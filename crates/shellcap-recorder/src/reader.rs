// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! asciicast reader for summaries and checks on finished recordings
//!
//! A recording cut short by a crash can end in a partial line. That trailing
//! fragment is dropped; any other malformed line is an error.

use crate::error::{Error, Result};
use crate::event::EventType;
use crate::format::AsciicastHeader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// One decoded `[time, code, data]` line
#[derive(Debug, Clone, PartialEq)]
pub struct CastEvent {
    /// Seconds since the header timestamp
    pub time: f64,
    pub event_type: EventType,
    pub data: String,
}

/// A fully decoded asciicast file
#[derive(Debug, Clone, PartialEq)]
pub struct CastRecording {
    pub header: AsciicastHeader,
    pub events: Vec<CastEvent>,
}

/// Headline numbers for a recording
#[derive(Debug, Clone, PartialEq)]
pub struct CastSummary {
    pub width: u16,
    pub height: u16,
    pub event_count: usize,
    pub input_events: usize,
    pub output_events: usize,
    pub output_bytes: usize,
    /// Time of the last event
    pub duration_secs: f64,
}

impl CastRecording {
    /// Every output event's data, concatenated
    pub fn output_text(&self) -> String {
        self.events
            .iter()
            .filter(|e| e.event_type == EventType::Output)
            .map(|e| e.data.as_str())
            .collect()
    }

    pub fn summary(&self) -> CastSummary {
        let count = |t: EventType| self.events.iter().filter(|e| e.event_type == t).count();
        CastSummary {
            width: self.header.width,
            height: self.header.height,
            event_count: self.events.len(),
            input_events: count(EventType::Input),
            output_events: count(EventType::Output),
            output_bytes: self
                .events
                .iter()
                .filter(|e| e.event_type == EventType::Output)
                .map(|e| e.data.len())
                .sum(),
            duration_secs: self.events.last().map(|e| e.time).unwrap_or_default(),
        }
    }
}

/// Reads asciicast v2 recordings
pub struct CastReader;

impl CastReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<CastRecording> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::from(e).context(format!("Failed to open {}", path.display())))?;
        let recording = Self::parse(BufReader::new(file))?;
        debug!(path = %path.display(), events = recording.events.len(), "Read recording");
        Ok(recording)
    }

    pub fn parse<R: BufRead>(mut reader: R) -> Result<CastRecording> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Parse {
                line: 1,
                message: "missing header".to_string(),
            });
        }
        let header: AsciicastHeader = serde_json::from_str(line.trim_end()).map_err(|e| Error::Parse {
            line: 1,
            message: e.to_string(),
        })?;

        let mut events = Vec::new();
        let mut number = 1;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            number += 1;
            let complete = line.ends_with('\n');
            let text = line.trim_end();
            if text.is_empty() {
                continue;
            }
            match parse_event(text) {
                Ok(event) => events.push(event),
                Err(message) if !complete => {
                    warn!(line = number, %message, "Dropping truncated final line");
                    break;
                }
                Err(message) => {
                    return Err(Error::Parse {
                        line: number,
                        message,
                    });
                }
            }
        }

        Ok(CastRecording { header, events })
    }
}

fn parse_event(text: &str) -> std::result::Result<CastEvent, String> {
    let (time, code, data): (f64, String, String) =
        serde_json::from_str(text).map_err(|e| e.to_string())?;
    let event_type =
        EventType::from_code(&code).ok_or_else(|| format!("unknown event code {:?}", code))?;
    Ok(CastEvent {
        time,
        event_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CAST: &str = concat!(
        "{\"version\":2,\"width\":80,\"height\":24,\"timestamp\":1700000000}\n",
        "[0.1,\"o\",\"$ \"]\n",
        "[0.5,\"i\",\"l\"]\n",
        "[1.25,\"o\",\"hello\\r\\n\"]\n",
    );

    #[test]
    fn test_parse_and_summarize() -> Result<()> {
        let recording = CastReader::parse(Cursor::new(CAST))?;
        assert_eq!(recording.header.version, 2);
        assert_eq!(recording.events.len(), 3);
        assert_eq!(recording.output_text(), "$ hello\r\n");

        let summary = recording.summary();
        assert_eq!(summary.input_events, 1);
        assert_eq!(summary.output_events, 2);
        assert_eq!(summary.output_bytes, 9);
        assert_eq!(summary.duration_secs, 1.25);
        Ok(())
    }

    #[test]
    fn test_truncated_tail_is_dropped() -> Result<()> {
        let cut = format!("{}[1.5,\"o\",\"par", CAST);
        let recording = CastReader::parse(Cursor::new(cut))?;
        assert_eq!(recording.events.len(), 3);
        Ok(())
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let bad = CAST.replace("[0.5,\"i\",\"l\"]", "[0.5,\"x\",\"l\"]");
        let err = CastReader::parse(Cursor::new(bad)).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, .. }));
    }

    #[test]
    fn test_empty_file_has_no_header() {
        assert!(matches!(
            CastReader::parse(Cursor::new("")),
            Err(Error::Parse { line: 1, .. })
        ));
    }
}
