use crate::analyzer::config::{MAX_PING_LENGTH, MAX_PING_PAYLOAD};
use crate::analyzer::detection::{AttackKind, AttackRecord, AttackTracker, Phase};
use crate::analyzer::types::{PacketRecord, Timestamp};
use crate::logger::Logger;

/// Whether an ICMP message is larger than any legal single datagram can carry.
///
/// `message_len` covers the ICMP header and data, `payload_len` the data only.
/// Such a message can only exist as a reassembled set of fragments.
pub fn is_oversized(message_len: usize, payload_len: usize) -> bool {
    message_len > MAX_PING_LENGTH || payload_len > MAX_PING_PAYLOAD
}

/// Flags oversized ICMP echo traffic.
///
/// There is no window: the attack is in progress for as long as consecutive
/// ICMP packets are oversized and ends at the first normal one.
#[derive(Debug)]
pub struct PingOfDeathDetector {
    tracker: AttackTracker,
}

impl Default for PingOfDeathDetector {
    fn default() -> Self {
        Self { tracker: AttackTracker::new(AttackKind::PingOfDeath) }
    }
}

impl PingOfDeathDetector {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one ICMPv4 packet. Returns the record of an attack that just ended.
    pub fn observe(&mut self, record: &PacketRecord, oversized: bool, logger: &Logger) -> Option<AttackRecord> {
        match self.tracker.update(oversized, record.timestamp, record.timestamp, logger) {
            Phase::Active(attack) => {
                attack.add_source(&record.src_ip);
                attack.add_target(&record.dst_ip);
                None
            }
            Phase::Ended(attack) => Some(attack),
            Phase::Idle => None,
        }
    }

    #[cfg(test)]
    pub fn in_progress(&self) -> bool {
        self.tracker.in_progress()
    }

    pub fn finish(&mut self, end: Timestamp) -> Option<AttackRecord> {
        self.tracker.finish(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::detection::testing::{at, icmp};

    #[test]
    fn size_bounds_are_exclusive() {
        assert!(!is_oversized(65_515, 65_507));
        assert!(is_oversized(65_516, 0));
        assert!(is_oversized(0, 65_508));
    }

    #[test]
    fn oversized_run_becomes_one_record() {
        let logger = Logger::discard();
        let mut detector = PingOfDeathDetector::new();

        assert!(detector.observe(&icmp(1, 0, "10.0.0.66", "10.0.0.1"), true, &logger).is_none());
        assert!(detector.observe(&icmp(2, 10, "10.0.0.67", "10.0.0.1"), true, &logger).is_none());
        assert!(detector.in_progress());

        let attack = detector.observe(&icmp(3, 20, "10.0.0.5", "10.0.0.1"), false, &logger).unwrap();
        assert_eq!(attack.name(), "PING OF DEATH");
        assert_eq!(attack.sources, vec!["10.0.0.66", "10.0.0.67"]);
        assert_eq!(attack.targets, vec!["10.0.0.1"]);
        assert_eq!(attack.start, at(0));
        assert_eq!(attack.end, Some(at(20)));
    }

    #[test]
    fn normal_pings_never_open_a_record() {
        let logger = Logger::discard();
        let mut detector = PingOfDeathDetector::new();
        for frame in 0..5 {
            assert!(detector.observe(&icmp(frame, frame as i64, "a", "b"), false, &logger).is_none());
        }
        assert!(!detector.in_progress());
    }
}
