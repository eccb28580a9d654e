// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! shellcap command-line interface

pub mod app;
pub mod config;
pub mod loading;
pub mod menu;
pub mod terminal;

pub use clap::Parser;

use config::Overrides;
use shellcap_logging::CliLoggingArgs;
use shellcap_recorder::RecordingFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shellcap")]
#[command(about = "Record interactive shell sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Operation slug; recordings are written to <output-dir>/<operation>
    #[arg(short, long)]
    pub operation: Option<String>,

    /// Prefix for generated recording file names
    #[arg(short, long)]
    pub name: Option<String>,

    /// Shell to record
    #[arg(short, long)]
    pub shell: Option<String>,

    /// Root directory for recordings
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Recording file format
    #[arg(long, value_name = "asciicast|typescript")]
    pub format: Option<RecordingFormat>,

    /// Also record keystrokes sent to the shell
    #[arg(long)]
    pub record_input: bool,

    /// Exit after one recording instead of showing the menu
    #[arg(long)]
    pub once: bool,

    /// Print the resolved configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Path to a configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,
}

impl Cli {
    /// Settings given on the command line, applied after the environment
    pub fn overrides(&self) -> Overrides {
        Overrides {
            output_dir: self.output_dir.clone(),
            recording_shell: self.shell.clone(),
            output_file_name_prefix: self.name.clone(),
            operation: self.operation.clone(),
            format: self.format,
            record_input: self.record_input.then_some(true),
        }
    }
}
