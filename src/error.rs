use std::path::PathBuf;

/// Errors that stop the analysis of one capture file.
///
/// Per-packet conditions that are expected in passive captures (missing
/// fragments, TCP segments that do not fit their flow) are not errors at this
/// level; they are logged and the frame is skipped.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture read error: {0}")]
    Capture(#[from] pcap_file::PcapError),

    #[error("unsupported link type {0}, only Ethernet captures can be analyzed")]
    UnsupportedLinkType(String),

    #[error("malformed {layer} header in frame {frame}: {detail}")]
    Decode {
        layer:  &'static str,
        frame:  u64,
        detail: String,
    },

    #[error("frame timestamp {0}s is out of range")]
    Timestamp(u64),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
