// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Top-level flow of the `shellcap` binary

use crate::Cli;
use crate::config::{Config, Overrides};
use crate::loading::run_with_spinner;
use crate::menu::{Menu, MenuChoice};
use crate::terminal::{install_restore_handlers, restore_quietly};
use anyhow::{Context, Result, anyhow};
use shellcap_recorder::{
    CastReader, CrosstermTerminal, DialogReader, RecordingFormat, RecordingInput,
    RecordingOutput, Recordings,
};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name used for the log file and default log filter
pub const COMPONENT: &str = "shellcap";

pub fn run(cli: Cli) -> Result<()> {
    let log_path = cli
        .logging
        .init(COMPONENT)
        .context("Failed to initialize logging")?;
    info!(log = %log_path.display(), version = env!("CARGO_PKG_VERSION"), "shellcap starting");

    let config = Config::resolve(
        cli.config.as_deref(),
        &Overrides::from_env(),
        &cli.overrides(),
    )
    .context("Failed to load configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate()?;
    install_restore_handlers()?;

    let mut recordings = Recordings::new(config.to_settings()).on_recording_start(announce);
    if let Some(redactor) = config.redactor()? {
        recordings = recordings.with_middleware(Arc::new(redactor));
    }
    recordings
        .initialize_recordings(RecordingInput::Stdin)
        .context("Unable to initialize recordings")?;
    let dialog = recordings
        .dialog_reader()
        .ok_or_else(|| anyhow!("Dialog input is already in use"))?;
    let mut menu = Menu::new(dialog, io::stdout());

    let result = record_until_quit(&recordings, &config, &mut menu, cli.once);
    restore_quietly(&CrosstermTerminal);
    let shutdown = recordings.shutdown();
    result?;
    shutdown?;
    info!("shellcap finished");
    Ok(())
}

/// Record, summarize and prompt until the user quits
///
/// A failure before the first successful recording is fatal. Later failures
/// are reported and the menu is shown again.
fn record_until_quit<W: Write>(
    recordings: &Recordings,
    config: &Config,
    menu: &mut Menu<DialogReader, W>,
    once: bool,
) -> Result<()> {
    let mut completed = 0usize;
    loop {
        match recordings.start_recording(&config.operation) {
            Ok(output) => {
                completed += 1;
                let summary = summarize(&output, config.format)?;
                menu.notify(&summary)?;
            }
            Err(err) if once || completed == 0 => return Err(err.into()),
            Err(err) => {
                error!(error = %err, "Recording failed");
                menu.notify(&format!("Recording failed: {err}"))?;
            }
        }

        if once {
            return Ok(());
        }
        let dropped = menu.discard_typeahead();
        if dropped > 0 {
            info!(bytes = dropped, "Discarded input typed after the shell exited");
        }
        match menu.prompt()? {
            MenuChoice::RecordAgain => continue,
            MenuChoice::Quit => return Ok(()),
        }
    }
}

/// Shown once the shell is live
fn announce(output: &RecordingOutput) {
    let mut stdout = io::stdout().lock();
    let written = write!(
        stdout,
        "Recording to {}\r\nRecording now live!\r\n",
        output.file_path.display()
    )
    .and_then(|()| stdout.flush());
    if let Err(err) = written {
        warn!(error = %err, "Failed to announce recording");
    }
}

fn summarize(output: &RecordingOutput, format: RecordingFormat) -> Result<String> {
    let mut stdout = io::stdout();
    let lines = run_with_spinner(
        &mut stdout,
        "Summarizing recording",
        vec![|| describe(output, format)],
    )?;
    Ok(lines.concat())
}

/// Human-readable description of a finished recording
pub fn describe(output: &RecordingOutput, format: RecordingFormat) -> String {
    let exit = output
        .exit_code
        .map_or_else(|| "unknown".to_string(), |code| code.to_string());
    let mut text = format!("Recording saved to {}\n", output.file_path.display());

    let details = match format {
        RecordingFormat::Asciicast => match CastReader::open(&output.file_path) {
            Ok(recording) => {
                let summary = recording.summary();
                format!(
                    "  {}x{}, {} events ({} output bytes, {} input events), {:.1}s",
                    summary.width,
                    summary.height,
                    summary.event_count,
                    summary.output_bytes,
                    summary.input_events,
                    summary.duration_secs
                )
            }
            Err(err) => {
                warn!(path = %output.file_path.display(), error = %err, "Could not read recording back");
                basic_details(output)
            }
        },
        RecordingFormat::Typescript => basic_details(output),
    };
    text.push_str(&details);
    text.push_str(&format!(", shell exited with {exit}"));
    text
}

fn basic_details(output: &RecordingOutput) -> String {
    format!(
        "  {} events, {:.1}s",
        output.event_count, output.duration_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellcap_recorder::{
        Clock, EventType, ManualClock, Recorder, SessionInfo, StreamingFileWriter, StreamingRecorder,
        WriterConfig,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_describe_reads_asciicast_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let clock = Arc::new(ManualClock::new(1_700_000_000_000_000_000));
        let header = SessionInfo::new("/bin/sh", 120, 40).metadata(clock.now_ns());
        let writer = StreamingFileWriter::create(
            temp.path(),
            "",
            RecordingFormat::Asciicast.formatter(),
            WriterConfig::default(),
            &header,
        )?;
        let path = writer.filepath().to_path_buf();
        let mut recorder = StreamingRecorder::with_header(writer, clock.clone(), header);
        clock.advance(Duration::from_millis(1500));
        recorder.add_event(EventType::Output, b"hello\r\n".to_vec(), clock.now_ns())?;
        recorder.finish()?;

        let output = RecordingOutput {
            file_path: path.clone(),
            exit_code: Some(0),
            event_count: 1,
            duration_secs: 1.5,
        };
        let text = describe(&output, RecordingFormat::Asciicast);
        assert!(text.starts_with(&format!("Recording saved to {}\n", path.display())));
        assert!(text.contains("120x40, 1 events (7 output bytes, 0 input events), 1.5s"));
        assert!(text.ends_with("shell exited with 0"));
        Ok(())
    }

    #[test]
    fn test_describe_typescript_uses_session_counts() {
        let output = RecordingOutput {
            file_path: PathBuf::from("/tmp/rec.log"),
            exit_code: None,
            event_count: 12,
            duration_secs: 3.3,
        };
        assert_eq!(
            describe(&output, RecordingFormat::Typescript),
            "Recording saved to /tmp/rec.log\n  12 events, 3.3s, shell exited with unknown"
        );
    }

    #[test]
    fn test_unreadable_cast_falls_back() {
        let output = RecordingOutput {
            file_path: PathBuf::from("/no/such/file.cast"),
            exit_code: Some(2),
            event_count: 4,
            duration_secs: 0.5,
        };
        let text = describe(&output, RecordingFormat::Asciicast);
        assert!(text.contains("  4 events, 0.5s, shell exited with 2"));
    }
}
