use crate::analyzer::config::{SMURF_THRESHOLD, SMURF_WINDOW_MS};
use crate::analyzer::detection::{AttackKind, AttackRecord, AttackTracker, Phase};
use crate::analyzer::types::{PacketRecord, Timestamp};
use crate::analyzer::window::{window_start, SlidingWindow};
use crate::logger::Logger;
use std::collections::HashSet;

/// Detects ICMP echo-reply amplification aimed at one victim.
///
/// A smurf victim receives echo replies from many hosts it never pinged. The
/// score is the number of distinct reply sources seen for one destination in
/// the lookback window.
#[derive(Debug)]
pub struct SmurfDetector {
    replies: SlidingWindow<String, PacketRecord>,
    tracker: AttackTracker,
}

impl Default for SmurfDetector {
    fn default() -> Self {
        Self {
            replies: SlidingWindow::new(),
            tracker: AttackTracker::new(AttackKind::Smurf),
        }
    }
}

impl SmurfDetector {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one echo reply. Returns the record of an attack that just ended.
    pub fn observe(&mut self, record: &PacketRecord, logger: &Logger) -> Option<AttackRecord> {
        let now    = record.timestamp;
        self.replies.expire(now, SMURF_WINDOW_MS);
        let recent = self.replies.observe(record.dst_ip.clone(), record.clone(), now, SMURF_WINDOW_MS);

        let sources: HashSet<&str> = recent.iter().map(|r| r.src_ip.as_str()).collect();
        let active = sources.len() >= SMURF_THRESHOLD;

        match self.tracker.update(active, window_start(now, SMURF_WINDOW_MS), now, logger) {
            Phase::Active(attack) => {
                for reply in recent {
                    attack.add_source(&reply.src_ip);
                    attack.add_target(&reply.dst_ip);
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
