// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use serde::{Deserialize, Serialize};

/// Direction of a recorded chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Bytes typed by the user and forwarded to the shell
    #[serde(rename = "i")]
    Input,
    /// Bytes produced by the shell
    #[serde(rename = "o")]
    Output,
}

impl EventType {
    /// Single-letter code used by line-oriented formats
    pub fn code(self) -> &'static str {
        match self {
            EventType::Input => "i",
            EventType::Output => "o",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(EventType::Input),
            "o" => Some(EventType::Output),
            _ => None,
        }
    }
}

/// A timestamped chunk of terminal I/O
///
/// Events are immutable once built; the recorder hands each one to its
/// writer exactly once and then drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: EventType,
    data: Vec<u8>,
    ts_ns: u64,
}

impl Event {
    /// Build an event from a chunk captured at `ts_ns` (nanoseconds since UNIX epoch)
    pub fn new(event_type: EventType, data: impl Into<Vec<u8>>, ts_ns: u64) -> Self {
        Self {
            event_type,
            data: data.into(),
            ts_ns,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn ts_ns(&self) -> u64 {
        self.ts_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_codes() {
        assert_eq!(EventType::Input.code(), "i");
        assert_eq!(EventType::Output.code(), "o");
        assert_eq!(EventType::from_code("o"), Some(EventType::Output));
        assert_eq!(EventType::from_code("x"), None);
    }

    #[test]
    fn test_event_accessors() {
        let evt = Event::new(EventType::Output, b"ls\r\n".to_vec(), 42);
        assert_eq!(evt.event_type(), EventType::Output);
        assert_eq!(evt.data(), b"ls\r\n");
        assert_eq!(evt.ts_ns(), 42);
    }
}
