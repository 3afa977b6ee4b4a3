mod analyzer;
mod capture;
mod cli;
mod error;
mod logger;
mod report;

use analyzer::types::Mode;
use clap::Parser;
use cli::Cli;
use logger::{Event, Logger};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli  = Cli::parse();
    let mode = Mode::from(cli.mode);

    let logger = match Logger::new(cli.json, cli.verbosity(), cli.output_file.as_deref()) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("capsift: cannot open output file: {}", e);
            return ExitCode::from(2);
        }
    };

    // ── Per-file analysis ────────────────────────────────────────────────────
    // Files are independent: each gets a fresh summary and a failure in one
    // does not stop the rest.
    let mut failed = 0;
    let mut frames = 0;

    for path in &cli.input_files {
        match analyzer::analyze_file(path, mode, &logger) {
            Ok(summary) => {
                frames += summary.frame_count;
                report::emit(&summary, mode, &logger);
            }
            Err(e) => {
                failed += 1;
                logger.log(&Event::FileFailed {
                    file:  &path.display().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    logger.log(&Event::SessionSummary { files: cli.input_files.len(), failed, frames });

    if failed > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
