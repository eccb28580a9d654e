// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for the shellcap binary
//!
//! Layers, lowest first: built-in defaults, the TOML config file, `SHELLCAP_*`
//! environment variables, command-line flags. The resolved value is turned into
//! [`RecordingSettings`] for the recorder.

use serde::{Deserialize, Serialize};
use shellcap_recorder::{RecordingFormat, RecordingSettings, RegexRedactor};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory name under the platform config and data directories
pub const APP_DIR: &str = "shellcap";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_OUTPUT_DIR: &str = "SHELLCAP_OUTPUT_DIR";
pub const ENV_RECORDING_SHELL: &str = "SHELLCAP_RECORDING_SHELL";
pub const ENV_OPERATION: &str = "SHELLCAP_OPERATION";

const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Resolved shellcap configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Root directory for recordings
    pub output_dir: PathBuf,
    /// Shell started inside the PTY
    pub recording_shell: String,
    /// Leading part of generated file names
    pub output_file_name_prefix: String,
    /// Operation slug; empty records straight into `output_dir`
    pub operation: String,
    pub format: RecordingFormat,
    pub record_input: bool,
    /// Regexes whose matches are masked in recorded events
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redact_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            recording_shell: std::env::var("SHELL")
                .ok()
                .filter(|shell| !shell.is_empty())
                .unwrap_or_else(|| FALLBACK_SHELL.to_string()),
            output_file_name_prefix: String::new(),
            operation: String::new(),
            format: RecordingFormat::default(),
            record_input: false,
            redact_patterns: Vec::new(),
        }
    }
}

/// `<data_dir>/shellcap/recordings`
pub fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("recordings")
}

/// `<config_dir>/shellcap/config.toml`, when the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
}

/// Values layered over the config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub recording_shell: Option<String>,
    pub output_file_name_prefix: Option<String>,
    pub operation: Option<String>,
    pub format: Option<RecordingFormat>,
    pub record_input: Option<bool>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            output_dir: var(ENV_OUTPUT_DIR).map(PathBuf::from),
            recording_shell: var(ENV_RECORDING_SHELL),
            operation: var(ENV_OPERATION),
            ..Default::default()
        }
    }
}

impl Config {
    /// Load the config file, or defaults when there is none
    ///
    /// An explicit `path` must exist. The default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Load and layer environment then command-line overrides
    pub fn resolve(
        path: Option<&Path>,
        env: &Overrides,
        cli: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply(env);
        config.apply(cli);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(shell) = &overrides.recording_shell {
            self.recording_shell = shell.clone();
        }
        if let Some(prefix) = &overrides.output_file_name_prefix {
            self.output_file_name_prefix = prefix.clone();
        }
        if let Some(operation) = &overrides.operation {
            self.operation = operation.clone();
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if let Some(record_input) = overrides.record_input {
            self.record_input = record_input;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recording_shell.trim().is_empty() {
            return Err(invalid("recording-shell", "must not be empty"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(invalid("output-dir", "must not be empty"));
        }
        if self.operation.contains(['/', '\\']) || self.operation == ".." {
            return Err(invalid(
                "operation",
                format!("{:?} must be a single path component", self.operation),
            ));
        }
        if self.output_file_name_prefix.contains(['/', '\\']) {
            return Err(invalid(
                "output-file-name-prefix",
                "must not contain path separators",
            ));
        }
        self.redactor()?;
        Ok(())
    }

    /// Redaction middleware for the configured patterns, if any
    pub fn redactor(&self) -> Result<Option<RegexRedactor>, ConfigError> {
        if self.redact_patterns.is_empty() {
            return Ok(None);
        }
        RegexRedactor::new(&self.redact_patterns)
            .map(Some)
            .map_err(|e| invalid("redact-patterns", e.to_string()))
    }

    pub fn to_settings(&self) -> RecordingSettings {
        RecordingSettings::new(&self.output_dir, &self.recording_shell)
            .with_name_prefix(&self.output_file_name_prefix)
            .with_format(self.format)
            .with_record_input(self.record_input)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}
