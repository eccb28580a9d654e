// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for shellcap binaries
//!
//! The recorder owns the real terminal while a session runs, so log output
//! never goes to the console: it always lands in a file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing::Level;

/// Directory and file stem used under the platform data directory
pub const APP_DIR: &str = "shellcap";

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Plaintext,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Log level as accepted on the command line
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Logging flags, meant for `#[command(flatten)]`
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level (default: info)
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format (default: plaintext)
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files (default: platform data directory)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log file name, or a full path
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Install the global subscriber writing to the resolved log file
    ///
    /// Returns the log file path so callers can mention it to the user.
    pub fn init(&self, component: &str) -> anyhow::Result<PathBuf> {
        let path = self.resolve_log_path(component);
        init_to_file(
            component,
            self.log_level.unwrap_or_default().into(),
            self.log_format.unwrap_or_default(),
            &path,
        )?;
        Ok(path)
    }

    /// Work out where logs go
    ///
    /// An absolute `log_file` wins. A relative one is placed under `log_dir`
    /// when given. Without `log_file`, `<log_dir>/<component>.log` or the
    /// platform default is used.
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        let dir = self.log_dir.as_deref().map(Path::new);
        match (self.log_file.as_deref().map(Path::new), dir) {
            (Some(file), _) if file.is_absolute() => file.to_path_buf(),
            (Some(file), Some(dir)) => dir.join(file),
            (Some(file), None) if file.parent().is_some_and(|p| !p.as_os_str().is_empty()) => {
                file.to_path_buf()
            }
            (Some(file), None) => standard_log_dir().join(file),
            (None, Some(dir)) => dir.join(format!("{}.log", component)),
            (None, None) => standard_log_dir().join(format!("{}.log", component)),
        }
    }
}

/// Platform directory for shellcap logs
///
/// `~/Library/Logs/shellcap` on macOS, `<data_dir>/shellcap` elsewhere.
pub fn standard_log_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    let base = dirs::home_dir()
        .map(|home| home.join("Library").join("Logs"))
        .unwrap_or_else(std::env::temp_dir);

    #[cfg(not(target_os = "macos"))]
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    base.join(APP_DIR)
}

/// Install the global subscriber, appending to `log_path`
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    init_with_writer(component, default_level, format, std::sync::Mutex::new(log_file))
}

/// Install the global subscriber over any writer
///
/// `RUST_LOG` overrides `default_level` when set.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(component, default_level)));

    // Log files are read in an editor, not a terminal
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    #[cfg(debug_assertions)]
    let layer = layer.with_file(true).with_line_number(true);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?,
        LogFormat::Plaintext => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?,
    }
    Ok(())
}

/// Directive used when `RUST_LOG` is unset
///
/// Crate targets use underscores, so `shellcap-cli` also enables `shellcap_cli`
/// and the recorder library.
pub fn default_filter(component: &str, level: Level) -> String {
    let target = component.replace('-', "_");
    format!("{level},{target}={level},shellcap_recorder={level}")
}
