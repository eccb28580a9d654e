// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Streaming writer for recording files
//!
//! Every header, event and footer chunk is appended to the file as soon as it
//! is produced, so killing the process loses at most the in-flight event.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::format::{Formatter, Metadata};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Default prefix for generated recording file names
pub const DEFAULT_NAME_PREFIX: &str = "recording";

/// Destination for encoded recording pieces
#[cfg_attr(test, mockall::automock)]
pub trait TerminalWriter: Send {
    /// Write the header. Must precede every event.
    fn write_header(&mut self, metadata: &Metadata) -> Result<()>;

    /// Append one event
    fn write_event(&mut self, event: &Event) -> Result<()>;

    /// Write the footer and release the destination. Only valid once.
    fn close(&mut self, footer: &Metadata) -> Result<()>;
}

/// Options for [`StreamingFileWriter`]
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Open the file in append mode so each chunk lands at the end
    pub append: bool,
    /// fsync after every chunk instead of only on close
    pub sync_each_write: bool,
    /// Extension used for generated file names
    pub extension: String,
    /// Leading part of generated file names
    pub name_prefix: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            append: true,
            sync_each_write: false,
            extension: "cast".to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl WriterConfig {
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn with_sync_each_write(mut self, sync: bool) -> Self {
        self.sync_each_write = sync;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Prefix for generated names. Empty falls back to the default.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.name_prefix = if prefix.is_empty() {
            DEFAULT_NAME_PREFIX.to_string()
        } else {
            prefix
        };
        self
    }
}

/// Writes a recording straight to disk, one chunk at a time
pub struct StreamingFileWriter {
    /// `None` once closed
    file: Option<File>,
    path: PathBuf,
    formatter: Box<dyn Formatter>,
    config: WriterConfig,
    events_written: u64,
}

impl std::fmt::Debug for StreamingFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFileWriter")
            .field("path", &self.path)
            .field("closed", &self.file.is_none())
            .field("events_written", &self.events_written)
            .finish()
    }
}

impl StreamingFileWriter {
    /// Create the destination file inside `dir` and write `header` to it
    ///
    /// `dir` is created if missing. With an empty `file_name` a unique
    /// `<prefix>_<timestamp>_<random>.<ext>` name is generated, otherwise the
    /// named file is created exclusively and an existing file is an error.
    /// The header is on disk when this returns.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        file_name: &str,
        formatter: Box<dyn Formatter>,
        config: WriterConfig,
        header: &Metadata,
    ) -> Result<Self> {
        let (file, path) = open_file(dir.as_ref(), file_name, &config)?;
        debug!(path = ?path, append = config.append, "Created recording file");

        let mut writer = Self {
            file: Some(file),
            path,
            formatter,
            config,
            events_written: 0,
        };
        let bytes = writer.formatter.write_header(header)?;
        writer
            .append(&bytes)
            .map_err(|e| e.context("Failed to write header"))?;

        debug!(path = ?writer.path, width = header.width, height = header.height, "Wrote header");
        Ok(writer)
    }

    /// Absolute path of the recording, valid right after construction
    pub fn filepath(&self) -> &Path {
        &self.path
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::WriterClosed)?;
        file.write_all(bytes)?;
        file.flush()?;
        if self.config.sync_each_write {
            file.sync_data()?;
        }
        Ok(())
    }
}

/// Create `dir` if needed and open the recording file inside it
fn open_file(dir: &Path, file_name: &str, config: &WriterConfig) -> Result<(File, PathBuf)> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::from(e).context(format!("Failed to create {}", dir.display())))?;
    let dir = fs::canonicalize(dir)?;

    let (file, path) = if file_name.is_empty() {
        let prefix = format!(
            "{}_{}_",
            config.name_prefix,
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );
        let suffix = format!(".{}", config.extension);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(&suffix).append(config.append);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o644));
        }
        let temp = builder
            .tempfile_in(&dir)
            .map_err(|e| Error::from(e).context("Failed to create recording file"))?;
        temp.keep()
            .map_err(|e| Error::from(e.error).context("Failed to persist recording file"))?
    } else {
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .write(true)
            .append(config.append)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::from(e).context(format!("Failed to create {}", path.display())))?;
        (file, path)
    };
    Ok((file, path))
}

impl TerminalWriter for StreamingFileWriter {
    /// The header went out in [`StreamingFileWriter::create`]
    fn write_header(&mut self, _metadata: &Metadata) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::WriterClosed);
        }
        Err(Error::HeaderAlreadyWritten)
    }

    fn write_event(&mut self, event: &Event) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::WriterClosed);
        }

        let bytes = self.formatter.write_event(event)?;
        if !bytes.is_empty() {
            self.append(&bytes).map_err(|e| e.context("Failed to write event"))?;
        }
        self.events_written += 1;

        trace!(bytes = bytes.len(), events = self.events_written, "Appended event");
        Ok(())
    }

    fn close(&mut self, footer: &Metadata) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::WriterClosed);
        }

        let bytes = self.formatter.write_footer(footer)?;
        let written = if bytes.is_empty() {
            Ok(())
        } else {
            self.append(&bytes).map_err(|e| e.context("Failed to write footer"))
        };

        // The handle is released even when the footer failed
        let file = self.file.take().ok_or(Error::WriterClosed)?;
        written?;
        file.sync_all()?;

        debug!(path = ?self.path, events = self.events_written, "Closed recording file");
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTerminalWriter;

impl TerminalWriter for NullTerminalWriter {
    fn write_header(&mut self, _metadata: &Metadata) -> Result<()> {
        Ok(())
    }

    fn write_event(&mut self, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _footer: &Metadata) -> Result<()> {
        Ok(())
    }
}

/// Everything a [`SavingTerminalWriter`] has been handed
#[derive(Debug, Default, Clone)]
pub struct SavedRecording {
    pub header: Option<Metadata>,
    pub events: Vec<Event>,
    pub footer: Option<Metadata>,
}

/// Keeps every piece in memory. Clones share the same storage so a test can
/// hand one clone to a recorder and inspect another.
#[derive(Debug, Default, Clone)]
pub struct SavingTerminalWriter {
    saved: Arc<Mutex<SavedRecording>>,
}

impl SavingTerminalWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SavedRecording {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl TerminalWriter for SavingTerminalWriter {
    fn write_header(&mut self, metadata: &Metadata) -> Result<()> {
        self.saved.lock().map_err(|_| Error::Poisoned)?.header = Some(metadata.clone());
        Ok(())
    }

    fn write_event(&mut self, event: &Event) -> Result<()> {
        self.saved.lock().map_err(|_| Error::Poisoned)?.events.push(event.clone());
        Ok(())
    }

    fn close(&mut self, footer: &Metadata) -> Result<()> {
        let mut saved = self.saved.lock().map_err(|_| Error::Poisoned)?;
        if saved.footer.is_some() {
            return Err(Error::WriterClosed);
        }
        saved.footer = Some(footer.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::format::{AsciicastFormatter, TypescriptFormatter};
    use tempfile::TempDir;

    const START: u64 = 1_700_000_000_000_000_000;

    fn metadata() -> Metadata {
        Metadata {
            version: 2,
            width: 80,
            height: 24,
            start_ns: START,
            ..Default::default()
        }
    }

    fn asciicast_writer(dir: &Path, name: &str) -> Result<StreamingFileWriter> {
        StreamingFileWriter::create(
            dir,
            name,
            Box::new(AsciicastFormatter::new()),
            WriterConfig::default(),
            &metadata(),
        )
    }

    #[test]
    fn test_writer_creates_missing_directory() -> Result<()> {
        let temp = TempDir::new()?;
        let dir = temp.path().join("ops").join("demo");

        let writer = asciicast_writer(&dir, "session.cast")?;
        assert!(dir.is_dir());
        assert!(writer.filepath().is_absolute());
        assert!(writer.filepath().exists());
        assert_eq!(writer.filepath().file_name().unwrap(), "session.cast");
        Ok(())
    }

    #[test]
    fn test_writer_generates_unique_names() -> Result<()> {
        let temp = TempDir::new()?;
        let first = asciicast_writer(temp.path(), "")?;
        let second = asciicast_writer(temp.path(), "")?;

        assert_ne!(first.filepath(), second.filepath());
        let name = first.filepath().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".cast"));
        Ok(())
    }

    #[test]
    fn test_writer_uses_name_prefix() -> Result<()> {
        let temp = TempDir::new()?;
        let writer = StreamingFileWriter::create(
            temp.path(),
            "",
            Box::new(AsciicastFormatter::new()),
            WriterConfig::default().with_name_prefix("nmap-scan"),
            &metadata(),
        )?;
        let name = writer.filepath().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("nmap-scan_"));
        assert_eq!(WriterConfig::default().with_name_prefix("").name_prefix, "recording");
        Ok(())
    }

    #[test]
    fn test_writer_refuses_existing_file() -> Result<()> {
        let temp = TempDir::new()?;
        std::fs::write(temp.path().join("taken.cast"), b"old")?;
        assert!(asciicast_writer(temp.path(), "taken.cast").is_err());
        Ok(())
    }

    #[test]
    fn test_writer_header_on_disk_after_create() -> Result<()> {
        let temp = TempDir::new()?;
        let mut writer = asciicast_writer(temp.path(), "a.cast")?;

        // Read while the writer is still open
        let contents = std::fs::read_to_string(writer.filepath())?;
        assert_eq!(contents.lines().count(), 1);
        let header: serde_json::Value = serde_json::from_str(contents.trim_end())?;
        assert_eq!(header["version"], 2);
        assert_eq!(header["width"], 80);

        assert!(matches!(
            writer.write_header(&metadata()),
            Err(Error::HeaderAlreadyWritten)
        ));
        assert_eq!(std::fs::read_to_string(writer.filepath())?, contents);
        Ok(())
    }

    #[test]
    fn test_writer_events_in_order_without_close() -> Result<()> {
        let temp = TempDir::new()?;
        let mut writer = asciicast_writer(temp.path(), "a.cast")?;

        for i in 0..5u64 {
            let data = format!("line {}\r\n", i);
            writer.write_event(&Event::new(EventType::Output, data, START + i * 1_000_000))?;
        }

        // Simulate a crash: drop without close
        let path = writer.filepath().to_path_buf();
        drop(writer);

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(contents.ends_with('\n'));
        for (i, line) in lines[1..].iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line)?;
            assert_eq!(value[2], format!("line {}\r\n", i));
        }
        Ok(())
    }

    #[test]
    fn test_writer_close_twice_is_error() -> Result<()> {
        let temp = TempDir::new()?;
        let mut writer = asciicast_writer(temp.path(), "a.cast")?;
        writer.close(&metadata())?;

        assert!(writer.is_closed());
        assert!(matches!(writer.close(&metadata()), Err(Error::WriterClosed)));
        let evt = Event::new(EventType::Output, b"late".to_vec(), START);
        assert!(matches!(writer.write_event(&evt), Err(Error::WriterClosed)));
        Ok(())
    }

    #[test]
    fn test_writer_footer_is_last() -> Result<()> {
        let temp = TempDir::new()?;
        let mut writer = StreamingFileWriter::create(
            temp.path(),
            "a.log",
            Box::new(TypescriptFormatter::new()),
            WriterConfig::default().with_extension("log"),
            &metadata(),
        )?;
        writer.write_event(&Event::new(EventType::Output, b"one ".to_vec(), START))?;
        writer.write_event(&Event::new(EventType::Output, b"two".to_vec(), START))?;
        writer.close(&Metadata {
            duration_secs: Some(1.0),
            event_count: Some(2),
            ..metadata()
        })?;

        let contents = std::fs::read_to_string(writer.filepath())?;
        assert!(contents.starts_with("Script started on "));
        let body_at = contents.find("one two").expect("body present");
        let footer_at = contents.find("\nScript done on ").expect("footer present");
        assert!(body_at < footer_at);
        assert!(contents.ends_with("2 events]\n"));
        Ok(())
    }

    #[test]
    fn test_saving_writer_shares_storage() -> Result<()> {
        let saving = SavingTerminalWriter::new();
        let mut handle = saving.clone();
        handle.write_header(&metadata())?;
        handle.write_event(&Event::new(EventType::Output, b"a".to_vec(), START))?;
        handle.close(&metadata())?;

        let saved = saving.snapshot();
        assert!(saved.header.is_some());
        assert_eq!(saved.events.len(), 1);
        assert!(saved.footer.is_some());
        assert!(handle.close(&metadata()).is_err());
        Ok(())
    }
}
