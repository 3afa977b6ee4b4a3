//! Per-file state: counters, trackers, detectors and what they found.

use crate::analyzer::arp::{ArpVerdict, IpMacTracker};
use crate::analyzer::detection::{
    AttackRecord, BruteForceDetector, PingOfDeathDetector, PortScanDetector, SmurfDetector,
    SynFloodDetector,
};
use crate::analyzer::flow::FlowTable;
use crate::analyzer::fragment::Reassembler;
use crate::analyzer::types::Timestamp;
use std::collections::{BTreeMap, BTreeSet};

/// Occurrences of each IP protocol number.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProtocolCounter {
    counts: BTreeMap<u8, u64>,
}

impl ProtocolCounter {
    pub fn increment(&mut self, protocol: u8) {
        *self.counts.entry(protocol).or_insert(0) += 1;
    }

    pub fn get(&self, protocol: u8) -> u64 {
        self.counts.get(&protocol).copied().unwrap_or(0)
    }

    /// `(protocol, count)` in ascending protocol order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts.iter().map(|(&p, &c)| (p, c))
    }
}

/// IANA keyword for the protocol numbers worth naming in a report.
pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        0   => "HOPOPT",
        1   => "ICMP",
        2   => "IGMP",
        4   => "IPv4",
        6   => "TCP",
        17  => "UDP",
        41  => "IPv6",
        43  => "IPv6-Route",
        44  => "IPv6-Frag",
        47  => "GRE",
        50  => "ESP",
        51  => "AH",
        58  => "IPv6-ICMP",
        59  => "IPv6-NoNxt",
        60  => "IPv6-Opts",
        89  => "OSPF",
        103 => "PIM",
        112 => "VRRP",
        132 => "SCTP",
        _   => "other",
    }
}

/// An ARP request that contradicted what the tracker had learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoofingAlert {
    pub timestamp: Timestamp,
    pub ip:        String,
    pub mac:       String,
    /// MAC the tracker had bound to `ip`.
    pub known_mac: Option<String>,
    /// IP the tracker had bound to `mac`.
    pub known_ip:  Option<String>,
    pub verdict:   ArpVerdict,
}

/// One instance of every attack detector.
#[derive(Debug, Default)]
pub struct Detectors {
    pub ping_of_death: PingOfDeathDetector,
    pub smurf:         SmurfDetector,
    pub syn_flood:     SynFloodDetector,
    pub port_scan:     PortScanDetector,
    pub brute_force:   BruteForceDetector,
}

/// Everything learned from one capture file.
///
/// Nothing here is shared between files: each file gets a fresh summary.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Path or label of the capture.
    pub source:            String,
    pub frame_count:       u64,
    pub non_ip_count:      u64,
    /// Completed three-way handshakes.
    pub handshake_count:   u64,
    pub unique_ips:        BTreeSet<String>,
    /// `ip:port` of every UDP sender.
    pub udp_sources:       BTreeSet<String>,
    pub flows:             FlowTable,
    pub protocols:         ProtocolCounter,
    pub ip_mac:            IpMacTracker,
    pub reassembler:       Reassembler,
    pub detectors:         Detectors,
    pub spoofing_alerts:   Vec<SpoofingAlert>,
    /// Finished attacks in the order they ended.
    pub attacks:           Vec<AttackRecord>,
    /// Capture time of the last frame processed.
    pub last_timestamp:    Option<Timestamp>,
}

impl RunSummary {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), ..Self::default() }
    }

    pub(crate) fn record_attack(&mut self, finished: Option<AttackRecord>) {
        if let Some(attack) = finished {
            self.attacks.push(attack);
        }
    }
}
