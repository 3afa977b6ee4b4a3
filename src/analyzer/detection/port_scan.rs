use crate::analyzer::config::{PORT_SCAN_THRESHOLD, PORT_SCAN_WINDOW_MS};
use crate::analyzer::detection::{AttackKind, AttackRecord, AttackTracker, Phase};
use crate::analyzer::types::{AddressPair, PacketRecord, Timestamp};
use crate::analyzer::window::{window_start, SlidingWindow};
use crate::logger::Logger;
use std::collections::HashSet;

/// Detects one host probing many ports on another.
///
/// Every TCP segment is held under the unordered IP pair it travels between;
/// the score is the number of distinct destination ports in the window.
#[derive(Debug)]
pub struct PortScanDetector {
    traffic: SlidingWindow<AddressPair, PacketRecord>,
    tracker: AttackTracker,
}

impl Default for PortScanDetector {
    fn default() -> Self {
        Self {
            traffic: SlidingWindow::new(),
            tracker: AttackTracker::new(AttackKind::PortScan),
        }
    }
}

impl PortScanDetector {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one TCP segment. Returns the record of a scan that just ended.
    pub fn observe(&mut self, record: &PacketRecord, logger: &Logger) -> Option<AttackRecord> {
        let now    = record.timestamp;
        self.traffic.expire(now, PORT_SCAN_WINDOW_MS);
        let key    = AddressPair::new(record.src_ip.as_str(), record.dst_ip.as_str());
        let recent = self.traffic.observe(key, record.clone(), now, PORT_SCAN_WINDOW_MS);

        let ports: HashSet<Option<u16>> = recent.iter().map(|r| r.dst_port).collect();
        let active = ports.len() >= PORT_SCAN_THRESHOLD;

        match self.tracker.update(active, window_start(now, PORT_SCAN_WINDOW_MS), now, logger) {
            Phase::Active(attack) => {
                for segment in recent {
                    attack.add_source(&segment.source_endpoint());
                    attack.add_target(&segment.destination_endpoint());
                }
                None
            }
            Phase::Ended(attack) => Some(attack),
            Phase::Idle => None,
        }
    }

    pub fn finish(&mut self, end: Timestamp) -> Option<AttackRecord> {
        self.tracker.finish(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::detection::testing::{at, tcp};
    use crate::analyzer::types::TcpFlags;

    const SYN: TcpFlags = TcpFlags { syn: true, ack: false, fin: false };

    #[test]
    fn twenty_one_ports_is_a_scan() {
        let logger = Logger::discard();
        let mut detector = PortScanDetector::new();

        for port in 1..=20u16 {
            let segment = tcp(port as u64, port as i64, ("10.0.0.66", 50_000), ("10.0.0.1", port), SYN);
            detector.observe(&segment, &logger);
        }
        assert!(!detector.tracker.in_progress());

        let segment = tcp(21, 21, ("10.0.0.66", 50_000), ("10.0.0.1", 21), SYN);
        detector.observe(&segment, &logger);

        let open = detector.tracker.current().unwrap();
        assert_eq!(open.name(), "PORT SCANNING");
        assert!(open.targets.iter().all(|t| t.starts_with("10.0.0.1:")));
        assert_eq!(open.targets.len(), 21);
        assert_eq!(open.sources, vec!["10.0.0.66:50000"]);
        assert_eq!(open.start, at(21 - 600));
    }

    #[test]
    fn same_port_repeatedly_is_not_a_scan() {
        let logger = Logger::discard();
        let mut detector = PortScanDetector::new();
        for n in 0..50u64 {
            let segment = tcp(n, n as i64, ("10.0.0.66", 40_000 + n as u16), ("10.0.0.1", 443), SYN);
            detector.observe(&segment, &logger);
        }
        assert!(!detector.tracker.in_progress());
    }

    #[test]
    fn slow_scan_stays_below_threshold() {
        let logger = Logger::discard();
        let mut detector = PortScanDetector::new();
        for port in 1..=30u16 {
            let segment = tcp(port as u64, port as i64 * 100, ("10.0.0.66", 50_000), ("10.0.0.1", port), SYN);
            detector.observe(&segment, &logger);
        }
        assert!(!detector.tracker.in_progress());
    }

    #[test]
    fn scan_is_reported_once_it_stops() {
        let logger = Logger::discard();
        let mut detector = PortScanDetector::new();
        for port in 1..=25u16 {
            let segment = tcp(port as u64, port as i64, ("10.0.0.66", 50_000), ("10.0.0.1", port), SYN);
            assert!(detector.observe(&segment, &logger).is_none());
        }

        let quiet = tcp(26, 10_000, ("10.0.0.66", 50_000), ("10.0.0.1", 80), SYN);
        let scan = detector.observe(&quiet, &logger).unwrap();
        assert_eq!(scan.targets.len(), 25);
        assert_eq!(scan.end, Some(at(10_000)));
    }
}
