use crate::analyzer::types::Mode;
use crate::logger::Verbosity;
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::PathBuf;

/// capsift: offline network forensics for pcap captures.
///
/// Replays one or more capture files through an Ethernet/IP/TCP/UDP/ICMP
/// decoder, tracks TCP connections and ARP bindings, and reports traffic
/// counts, per-connection detail or suspected attacks.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "capsift",
    version,
    about   = "Offline pcap analysis: traffic counts, TCP flows and attack detection",
    long_about = None,
)]
pub struct Cli {
    // ── Analysis ─────────────────────────────────────────────────────────────

    /// What to report for each capture file.
    #[arg(short = 'm', long = "mode", value_name = "MODE", value_enum)]
    pub mode: AnalysisMode,

    /// Capture files to analyze, in order.
    ///
    /// Each file is analyzed on its own; nothing carries over from one file
    /// to the next. Only classic pcap files with Ethernet framing are read.
    #[arg(
        short = 'f',
        long = "input-files",
        value_name = "FILE",
        num_args = 1..,
        required = true,
        value_parser = readable_file,
    )]
    pub input_files: Vec<PathBuf>,

    // ── Output ───────────────────────────────────────────────────────────────

    /// Also append every emitted line to this file.
    ///
    /// The file is created if it does not exist and appended to if it does.
    /// JSON mode (--json) affects the format written to this file as well.
    #[arg(short = 'o', long = "output-file", value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Emit newline-delimited JSON (NDJSON) instead of plain text.
    ///
    /// Diagnostics and the report share the same stream, one self-contained
    /// JSON object per line with an `event` key.
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Include trace diagnostics: rejected TCP transitions, fragment
    /// handling, ARP verdicts, echo traffic and captured Telnet credentials.
    #[arg(short = 'v', long = "verbose", conflicts_with = "silent")]
    pub verbose: bool,

    /// Print nothing to the console; requires --output-file.
    #[arg(short = 's', long = "silent", requires = "output_file")]
    pub silent: bool,
}

/// Report detail level, chosen by number or name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalysisMode {
    /// Unique IPs, handshakes, UDP sources, non-IP and total frames.
    #[value(name = "1", alias = "basic")]
    Basic,
    /// Basic counts plus every TCP connection and a protocol table.
    #[value(name = "2", alias = "detailed")]
    Detailed,
    /// Suspected attacks and ARP spoofing.
    #[value(name = "3", alias = "attacks")]
    Attacks,
}

impl From<AnalysisMode> for Mode {
    fn from(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Basic    => Mode::Basic,
            AnalysisMode::Detailed => Mode::Detailed,
            AnalysisMode::Attacks  => Mode::Attacks,
        }
    }
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.silent {
            Verbosity::Silent
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

fn readable_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if !path.is_file() {
        return Err(format!("{} is not an existing file", value));
    }
    File::open(&path).map_err(|e| format!("{} cannot be read: {}", value, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    const MANIFEST: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("capsift").chain(args.iter().copied()))
    }

    #[test]
    fn mode_accepts_numbers_and_names() {
        let numeric = parse(&["-m", "2", "-f", MANIFEST]).unwrap();
        assert_eq!(Mode::from(numeric.mode), Mode::Detailed);

        let named = parse(&["--mode", "attacks", "--input-files", MANIFEST]).unwrap();
        assert_eq!(Mode::from(named.mode), Mode::Attacks);

        assert_eq!(parse(&["-m", "4", "-f", MANIFEST]).unwrap_err().kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn several_input_files_keep_their_order() {
        let lib = concat!(env!("CARGO_MANIFEST_DIR"), "/src/main.rs");
        let cli = parse(&["-m", "1", "-f", MANIFEST, lib]).unwrap();
        assert_eq!(cli.input_files, vec![PathBuf::from(MANIFEST), PathBuf::from(lib)]);
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn missing_input_file_is_rejected_at_parse_time() {
        let err = parse(&["-m", "1", "-f", "/nonexistent/capture.pcap"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn silent_needs_an_output_file() {
        let err = parse(&["-m", "1", "-f", MANIFEST, "-s"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let cli = parse(&["-m", "1", "-f", MANIFEST, "-s", "-o", "/tmp/capsift.log"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Silent);
    }

    #[test]
    fn silent_and_verbose_conflict() {
        let err = parse(&["-m", "1", "-f", MANIFEST, "-s", "-v", "-o", "/tmp/capsift.log"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }
}
