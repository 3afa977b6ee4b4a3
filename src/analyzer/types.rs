use chrono::{DateTime, Utc};
use std::fmt;

/// Capture timestamp of a frame.
pub type Timestamp = DateTime<Utc>;

/// What a run collects and what the report prints at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Frame, host, handshake and UDP-source counts only.
    Basic,
    /// Basic counts plus per-flow TCP detail and the protocol table.
    Detailed,
    /// Runs the ARP tracker and every attack detector.
    Attacks,
}

impl Mode {
    pub fn detects_attacks(self) -> bool {
        self == Mode::Attacks
    }
}

/// The three TCP control bits the flow state machine looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

/// Metadata extracted from one captured frame.
///
/// Built up layer by layer while the frame is decoded and never changed once
/// the frame's detectors have run. Detector windows keep their own copies.
/// Two records compare equal only if they describe the same frame, since the
/// capture ordinal takes part in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PacketRecord {
    /// 1-based position of the frame in its capture file.
    pub frame:             u64,
    pub timestamp:         Timestamp,
    /// Length of the raw link-layer frame in bytes.
    pub frame_len:         usize,
    pub src_mac:           String,
    pub dst_mac:           String,
    pub ether_type:        u16,
    pub src_ip:            String,
    pub dst_ip:            String,
    pub src_port:          Option<u16>,
    pub dst_port:          Option<u16>,
    pub protocol:          Option<u8>,
    /// IPv4 identification of the datagram this frame completed, if any.
    pub ip_identification: Option<u16>,
    pub reassembled:       bool,
    pub tcp_flags:         TcpFlags,
}

impl PacketRecord {
    pub fn new(frame: u64, timestamp: Timestamp, frame_len: usize) -> Self {
        Self {
            frame,
            timestamp,
            frame_len,
            src_mac:           String::new(),
            dst_mac:           String::new(),
            ether_type:        0,
            src_ip:            String::new(),
            dst_ip:            String::new(),
            src_port:          None,
            dst_port:          None,
            protocol:          None,
            ip_identification: None,
            reassembled:       false,
            tcp_flags:         TcpFlags::default(),
        }
    }

    /// `ip:port` of the sender, or just the IP when no transport port is known.
    pub fn source_endpoint(&self) -> String {
        endpoint(&self.src_ip, self.src_port)
    }

    /// `ip:port` of the receiver, or just the IP when no transport port is known.
    pub fn destination_endpoint(&self) -> String {
        endpoint(&self.dst_ip, self.dst_port)
    }
}

fn endpoint(ip: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{}:{}", ip, port),
        None       => ip.to_string(),
    }
}

/// Direction-agnostic key over two addresses.
///
/// The two addresses are stored in sorted order so that `(a, b)` and `(b, a)`
/// hash and compare identically, the same normalisation a bidirectional flow
/// table needs. Either IPs or `ip:port` endpoints may be used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressPair {
    low:  String,
    high: String,
}

impl AddressPair {
    /// # Panics
    /// Panics if either address is empty.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        assert!(
            !a.is_empty() && !b.is_empty(),
            "address pair needs two non-empty addresses (got {:?}, {:?})",
            a,
            b
        );

        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    #[cfg(test)]
    pub fn low(&self) -> &str {
        &self.low
    }

    #[cfg(test)]
    pub fn high(&self) -> &str {
        &self.high
    }

    #[cfg(test)]
    pub fn contains(&self, address: &str) -> bool {
        self.low == address || self.high == address
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(pair: &AddressPair) -> u64 {
        let mut hasher = DefaultHasher::new();
        pair.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn pair_is_order_independent() {
        let forward  = AddressPair::new("10.0.0.1:1234", "10.0.0.2:80");
        let backward = AddressPair::new("10.0.0.2:80", "10.0.0.1:1234");

        assert_eq!(forward, backward);
        assert_eq!(hash_of(&forward), hash_of(&backward));
        assert_eq!(forward.low(), "10.0.0.1:1234");
        assert!(forward.contains("10.0.0.2:80"));
    }

    #[test]
    fn pair_with_same_address_twice() {
        let pair = AddressPair::new("::1", "::1");
        assert_eq!(pair.low(), pair.high());
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn pair_rejects_empty_address() {
        AddressPair::new("", "10.0.0.1");
    }

    #[test]
    fn endpoints_fall_back_to_bare_ip() {
        let mut record = PacketRecord::new(1, Utc::now(), 60);
        record.src_ip = "192.168.1.5".into();
        record.dst_ip = "192.168.1.9".into();
        record.dst_port = Some(443);

        assert_eq!(record.source_endpoint(), "192.168.1.5");
        assert_eq!(record.destination_endpoint(), "192.168.1.9:443");
    }
}
