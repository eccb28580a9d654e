// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte-sink adapter that turns writes into recorder events
//!
//! Middleware failures never fail a write. A middleware that errors is skipped
//! for that chunk (identity transform) and the failure is logged: keeping the
//! recording alive takes priority over transform correctness.

use crate::error::{Error, Result};
use crate::event::EventType;
use crate::recorder::{Recorder, SharedRecorder};
use regex::bytes::{NoExpand, Regex};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::warn;

/// Transforms a chunk before it is recorded
pub trait EventMiddleware: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn transform(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Replaces every match of a set of patterns with a fixed mask
#[derive(Debug, Clone)]
pub struct RegexRedactor {
    patterns: Vec<Regex>,
    mask: Vec<u8>,
}

impl RegexRedactor {
    pub const DEFAULT_MASK: &'static str = "[REDACTED]";

    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| Error::InvalidPattern(format!("{:?}: {}", p.as_ref(), e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            mask: Self::DEFAULT_MASK.as_bytes().to_vec(),
        })
    }

    pub fn with_mask(mut self, mask: impl Into<Vec<u8>>) -> Self {
        self.mask = mask.into();
        self
    }
}

impl EventMiddleware for RegexRedactor {
    fn name(&self) -> &str {
        "regex-redactor"
    }

    fn transform(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = data.to_vec();
        for pattern in &self.patterns {
            out = pattern.replace_all(&out, NoExpand(&self.mask)).into_owned();
        }
        Ok(out)
    }
}

/// Run `data` through each middleware in order, skipping any that fail
pub fn apply_middleware(middleware: &[Arc<dyn EventMiddleware>], data: &[u8]) -> Vec<u8> {
    let mut current = data.to_vec();
    for m in middleware {
        match m.transform(&current) {
            Ok(next) => current = next,
            Err(e) => {
                warn!(middleware = m.name(), error = %e, "Middleware failed, passing chunk through");
            }
        }
    }
    current
}

/// Writer that records every chunk written to it
///
/// Clones are not provided; build one writer per direction over the same
/// shared recorder.
pub struct EventWriter<R: Recorder> {
    recorder: SharedRecorder<R>,
    event_type: EventType,
    middleware: Vec<Arc<dyn EventMiddleware>>,
}

impl<R: Recorder> EventWriter<R> {
    pub fn new(
        recorder: SharedRecorder<R>,
        event_type: EventType,
        middleware: Vec<Arc<dyn EventMiddleware>>,
    ) -> Self {
        Self {
            recorder,
            event_type,
            middleware,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl<R: Recorder> Write for EventWriter<R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let data = apply_middleware(&self.middleware, buf);

        let mut recorder = self
            .recorder
            .lock()
            .map_err(|_| io::Error::other(Error::Poisoned))?;
        // Timestamp under the lock so file order and time order agree
        let ts = recorder.now_ns();
        recorder.add_event(self.event_type, data, ts)?;

        // The caller's bytes were consumed even if middleware changed the length
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recorder::{MemoryRecorder, SessionInfo};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Upper;

    impl EventMiddleware for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn transform(&self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.to_ascii_uppercase())
        }
    }

    struct Broken;

    impl EventMiddleware for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn transform(&self, _data: &[u8]) -> Result<Vec<u8>> {
            Err(Error::Pty("cannot transform".to_string()))
        }
    }

    fn shared_recorder(clock: Arc<ManualClock>) -> SharedRecorder<MemoryRecorder> {
        Arc::new(Mutex::new(MemoryRecorder::new(
            clock,
            &SessionInfo::new("/bin/sh", 80, 24),
        )))
    }

    #[test]
    fn test_each_write_is_one_event() -> io::Result<()> {
        let clock = Arc::new(ManualClock::new(1_000));
        let recorder = shared_recorder(clock.clone());
        let mut writer = EventWriter::new(recorder.clone(), EventType::Output, Vec::new());

        writer.write_all(b"hello ")?;
        clock.advance(Duration::from_millis(10));
        writer.write_all(b"world")?;

        let recorder = recorder.lock().unwrap();
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data(), b"hello ");
        assert_eq!(events[0].ts_ns(), 1_000);
        assert_eq!(events[1].ts_ns(), 1_000 + 10_000_000);
        assert!(events.iter().all(|e| e.event_type() == EventType::Output));
        Ok(())
    }

    #[test]
    fn test_middleware_applied_in_order() -> io::Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let recorder = shared_recorder(clock);
        let redactor = RegexRedactor::new(["SECRET"]).map_err(io::Error::from)?;
        let middleware: Vec<Arc<dyn EventMiddleware>> = vec![Arc::new(Upper), Arc::new(redactor)];
        let mut writer = EventWriter::new(recorder.clone(), EventType::Input, middleware);

        let written = writer.write(b"export token=secret")?;
        assert_eq!(written, b"export token=secret".len());

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.events()[0].data(), b"EXPORT TOKEN=[REDACTED]");
        assert_eq!(recorder.events()[0].event_type(), EventType::Input);
        Ok(())
    }

    #[test]
    fn test_failing_middleware_degrades_to_identity() -> io::Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let recorder = shared_recorder(clock);
        let middleware: Vec<Arc<dyn EventMiddleware>> = vec![Arc::new(Broken), Arc::new(Upper)];
        let mut writer = EventWriter::new(recorder.clone(), EventType::Output, middleware);

        writer.write_all(b"still recorded")?;

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.events()[0].data(), b"STILL RECORDED");
        Ok(())
    }

    #[test]
    fn test_redactor_rejects_bad_pattern() {
        assert!(RegexRedactor::new(["("]).is_err());
    }

    #[test]
    fn test_redactor_custom_mask() -> Result<()> {
        let redactor = RegexRedactor::new([r"pass(word)?=\S+"])?.with_mask("***");
        assert_eq!(redactor.transform(b"login password=hunter2 ok")?, b"login *** ok");
        Ok(())
    }
}
