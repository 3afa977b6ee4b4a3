//! Offline capture input.
//!
//! Reads classic libpcap files with the pure-Rust `pcap-file` crate and hands
//! out owned [`Frame`]s in capture order. Only Ethernet captures are accepted.

use crate::analyzer::types::Timestamp;
use crate::error::{AnalyzerError, Result};
use chrono::DateTime;
use pcap_file::pcap::{PcapPacket, PcapReader};
use pcap_file::DataLink;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One captured link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub timestamp: Timestamp,
    pub data:      Vec<u8>,
}

impl Frame {
    fn from_packet(packet: &PcapPacket) -> Result<Self> {
        let secs = packet.timestamp.as_secs();
        let timestamp = i64::try_from(secs)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, packet.timestamp.subsec_nanos()))
            .ok_or(AnalyzerError::Timestamp(secs))?;

        Ok(Self { timestamp, data: packet.data.to_vec() })
    }
}

/// An open capture file, iterated frame by frame.
pub struct CaptureFile {
    reader:    PcapReader<BufReader<File>>,
    link_type: DataLink,
}

impl CaptureFile {
    /// Opens `path` and checks that it holds Ethernet frames.
    ///
    /// # Errors
    /// Fails if the file cannot be opened, is not a pcap file, or uses any
    /// other link-layer type.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| AnalyzerError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let reader    = PcapReader::new(BufReader::new(file))?;
        let link_type = reader.header().datalink;
        if link_type != DataLink::ETHERNET {
            return Err(AnalyzerError::UnsupportedLinkType(format!("{:?}", link_type)));
        }

        Ok(Self { reader, link_type })
    }

    pub fn link_type(&self) -> DataLink {
        self.link_type
    }
}

impl Iterator for CaptureFile {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let packet = match self.reader.next_packet()? {
            Ok(packet) => packet,
            Err(e)     => return Some(Err(e.into())),
        };
        Some(Frame::from_packet(&packet))
    }
}
