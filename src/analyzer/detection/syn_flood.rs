use crate::analyzer::config::{SYN_FLOOD_MAX_UNACKED, SYN_FLOOD_WINDOW_MS};
use crate::analyzer::detection::{AttackKind, AttackRecord, AttackTracker, Phase};
use crate::analyzer::types::{PacketRecord, Timestamp};
use crate::analyzer::window::SlidingWindow;
use crate::logger::Logger;

/// Detects half-open connection floods against one server.
///
/// Every opening SYN is held under its server's IP until the handshake
/// completes; the score is the number still pending within the window.
#[derive(Debug)]
pub struct SynFloodDetector {
    pending: SlidingWindow<String, PacketRecord>,
    tracker: AttackTracker,
}

impl Default for SynFloodDetector {
    fn default() -> Self {
        Self {
            pending: SlidingWindow::new(),
            tracker: AttackTracker::new(AttackKind::SynFlood),
        }
    }
}

impl SynFloodDetector {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the SYN that opened a flow. Returns the record of an attack that
    /// just ended.
    pub fn syn(&mut self, record: &PacketRecord, logger: &Logger) -> Option<AttackRecord> {
        let now     = record.timestamp;
        self.pending.expire(now, SYN_FLOOD_WINDOW_MS);
        let pending = self.pending.observe(record.dst_ip.clone(), record.clone(), now, SYN_FLOOD_WINDOW_MS);

        let active = pending.len() > SYN_FLOOD_MAX_UNACKED;
        let start  = pending.iter().map(|r| r.timestamp).min().unwrap_or(now);
        let end    = pending.iter().map(|r| r.timestamp).max().unwrap_or(now);

        match self.tracker.update(active, start, end, logger) {
            Phase::Active(attack) => {
                for syn in pending {
                    attack.add_source(&syn.source_endpoint());
                    attack.add_target(&syn.destination_endpoint());
                }
                None
            }
            Phase::Ended(attack) => Some(attack),
            Phase::Idle => None,
        }
    }

    /// The handshake opened by `opening` completed; it is no longer pending.
    pub fn ack_received(&mut self, server_ip: &str, opening: &PacketRecord) -> bool {
        self.pending.remove_item(&server_ip.to_string(), opening)
    }

    #[cfg(test)]
    pub fn pending_for(&self, server_ip: &str) -> usize {
        self.pending.get(&server_ip.to_string()).map_or(0, <[PacketRecord]>::len)
    }

    pub fn finish(&mut self, end: Timestamp) -> Option<AttackRecord> {
        self.tracker.finish(end)
    }
}
