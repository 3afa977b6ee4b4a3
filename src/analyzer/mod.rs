//! The offline analysis engine.
//!
//! ## Pipeline
//!
//! ```text
//! CaptureFile ──▶ Analyzer::process_frame ──▶ ethernet ─┬─▶ arp (spoof tracker)
//!                                                       ├─▶ ipv4 ──▶ reassembly ─┐
//!                                                       └─▶ ipv6 ────────────────┤
//!                                                                                ▼
//!                        icmpv4 / icmpv6 / tcp / udp  ◀──  transport dispatch
//!                                    │
//!                                    ├─▶ FlowTable (TCP handshake / close)
//!                                    └─▶ detectors  ──▶ RunSummary.attacks
//! ```
//!
//! Frames are handled strictly in capture order and every bit of state lives
//! in the [`RunSummary`] of the file being read, so two runs over the same
//! capture produce the same summary.

pub mod arp;
pub mod config;
mod decode;
pub mod detection;
pub mod flow;
pub mod fragment;
pub mod summary;
pub mod types;
pub mod window;

use crate::capture::{CaptureFile, Frame};
use crate::error::Result;
use crate::logger::{Event, Logger};
use std::path::Path;
use summary::RunSummary;
use types::{Mode, PacketRecord};

/// Replays one capture file into a [`RunSummary`].
pub struct Analyzer<'a> {
    mode:    Mode,
    logger:  &'a Logger,
    summary: RunSummary,
}

impl<'a> Analyzer<'a> {
    pub fn new(source: impl Into<String>, mode: Mode, logger: &'a Logger) -> Self {
        Self { mode, logger, summary: RunSummary::new(source) }
    }

    /// Decodes one frame and feeds it to the flow table and, in attack mode,
    /// to the detectors.
    ///
    /// # Errors
    /// Returns [`crate::error::AnalyzerError::Decode`] when a header present
    /// in the frame cannot be parsed. The caller should stop reading the file.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<()> {
        self.summary.frame_count   += 1;
        self.summary.last_timestamp = Some(frame.timestamp);

        let mut record = PacketRecord::new(self.summary.frame_count, frame.timestamp, frame.data.len());
        self.ethernet(&mut record, &frame.data)
    }

    /// Closes any attack still in progress at the last frame and hands back
    /// the summary.
    pub fn finish(mut self) -> RunSummary {
        if let Some(end) = self.summary.last_timestamp {
            let detectors = &mut self.summary.detectors;
            let pending = [
                detectors.ping_of_death.finish(end),
                detectors.smurf.finish(end),
                detectors.syn_flood.finish(end),
                detectors.port_scan.finish(end),
                detectors.brute_force.finish(end),
            ];
            for attack in pending {
                self.summary.record_attack(attack);
            }
        }
        self.summary
    }
}

/// Runs every frame of `frames` through a fresh [`Analyzer`].
///
/// # Errors
/// Stops at the first frame that cannot be read or decoded.
pub fn analyze_frames<I>(source: &str, frames: I, mode: Mode, logger: &Logger) -> Result<RunSummary>
where
    I: IntoIterator<Item = Result<Frame>>,
{
    let mut analyzer = Analyzer::new(source, mode, logger);
    for frame in frames {
        analyzer.process_frame(&frame?)?;
    }
    Ok(analyzer.finish())
}

/// Opens `path` and analyzes it from the first frame to the last.
pub fn analyze_file(path: &Path, mode: Mode, logger: &Logger) -> Result<RunSummary> {
    let capture = CaptureFile::open(path)?;
    let source  = path.display().to_string();

    logger.log(&Event::FileOpened { file: &source, link_type: &format!("{:?}", capture.link_type()) });
    analyze_frames(&source, capture, mode, logger)
}
