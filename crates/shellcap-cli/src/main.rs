// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use shellcap_cli::{Cli, Parser, app};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match app::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "shellcap exited with an error");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
