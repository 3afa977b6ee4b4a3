//! Attack heuristics.
//!
//! Every detector follows the same start/continue/end shape, implemented once
//! by [`AttackTracker`]: when its condition first becomes true an
//! [`AttackRecord`] is opened; while it stays true new sources and targets are
//! merged into that record; when it clears the record gets its end time and is
//! handed back to the caller to be kept in the run summary.
//!
//! The in-progress flag is per detector, not per key: two hosts flooded at the
//! same time end up in one record.

pub mod brute_force;
pub mod ping_of_death;
pub mod port_scan;
pub mod smurf;
pub mod syn_flood;

pub use brute_force::BruteForceDetector;
pub use ping_of_death::PingOfDeathDetector;
pub use port_scan::PortScanDetector;
pub use smurf::SmurfDetector;
pub use syn_flood::SynFloodDetector;

use crate::analyzer::types::Timestamp;
use crate::logger::{Event, Logger};
use chrono::SecondsFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    PingOfDeath,
    Smurf,
    SynFlood,
    PortScan,
    BruteForce,
}

impl AttackKind {
    pub fn name(self) -> &'static str {
        match self {
            AttackKind::PingOfDeath => "PING OF DEATH",
            AttackKind::Smurf       => "SMURF ATTACK",
            AttackKind::SynFlood    => "SYN FLOOD",
            AttackKind::PortScan    => "PORT SCANNING",
            AttackKind::BruteForce  => "BRUTE FORCE / DICTIONARY ATTACK",
        }
    }
}

/// One detected attack.
///
/// `sources`, `targets` and `credentials` keep first-seen order and hold each
/// value once. Empty strings are never added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackRecord {
    pub kind:        AttackKind,
    pub sources:     Vec<String>,
    pub targets:     Vec<String>,
    /// `username:password` pairs; only the Telnet detector fills this.
    pub credentials: Vec<String>,
    pub start:       Timestamp,
    /// Set when the condition clears, or when the capture ends mid-attack.
    pub end:         Option<Timestamp>,
}

impl AttackRecord {
    pub fn new(kind: AttackKind, start: Timestamp) -> Self {
        Self {
            kind,
            sources:     Vec::new(),
            targets:     Vec::new(),
            credentials: Vec::new(),
            start,
            end:         None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn add_source(&mut self, source: &str) {
        push_unique(&mut self.sources, source);
    }

    pub fn add_target(&mut self, target: &str) {
        push_unique(&mut self.targets, target);
    }

    pub fn add_credential(&mut self, credential: &str) {
        push_unique(&mut self.credentials, credential);
    }

    /// Time from start to end, or zero while the record is still open.
    pub fn duration_ms(&self) -> i64 {
        self.end.map_or(0, |end| (end - self.start).num_milliseconds())
    }
}

fn push_unique(set: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !set.iter().any(|held| held == value) {
        set.push(value.to_string());
    }
}

pub(crate) fn rfc3339(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Where a detector stands after evaluating its condition for one packet.
pub enum Phase<'a> {
    /// Condition false and nothing open.
    Idle,
    /// Condition true; merge this packet's evidence into the open record.
    Active(&'a mut AttackRecord),
    /// Condition just cleared; the finished record.
    Ended(AttackRecord),
}

/// The start/continue/end state shared by all detectors.
#[derive(Debug)]
pub struct AttackTracker {
    kind: AttackKind,
    open: Option<AttackRecord>,
}

impl AttackTracker {
    pub fn new(kind: AttackKind) -> Self {
        Self { kind, open: None }
    }

    pub fn in_progress(&self) -> bool {
        self.open.is_some()
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&AttackRecord> {
        self.open.as_ref()
    }

    /// Applies one evaluation of the detector's condition.
    ///
    /// `start` is used only when a record is opened, `end` only when one is
    /// closed.
    pub fn update(&mut self, active: bool, start: Timestamp, end: Timestamp, logger: &Logger) -> Phase<'_> {
        let name = self.kind.name();

        if active {
            if self.open.is_none() {
                logger.log(&Event::AttackStarted { name, start: rfc3339(start) });
            }
            let kind = self.kind;
            return Phase::Active(self.open.get_or_insert_with(|| AttackRecord::new(kind, start)));
        }

        match self.open.take() {
            Some(mut record) => {
                record.end = Some(end);
                logger.log(&Event::AttackEnded { name, end: rfc3339(end) });
                Phase::Ended(record)
            }
            None => Phase::Idle,
        }
    }

    /// Closes a still-open record at end of capture.
    pub fn finish(&mut self, end: Timestamp) -> Option<AttackRecord> {
        self.open.take().map(|mut record| {
            record.end = Some(end);
            record
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::analyzer::types::{PacketRecord, TcpFlags, Timestamp};
    use chrono::TimeZone;

    pub fn at(ms: i64) -> Timestamp {
        chrono::Utc.timestamp_millis_opt(ms).unwrap()
    }

    /// A TCP record between two endpoints at `ms` milliseconds.
    pub fn tcp(frame: u64, ms: i64, src: (&str, u16), dst: (&str, u16), flags: TcpFlags) -> PacketRecord {
        let mut record = PacketRecord::new(frame, at(ms), 60);
        record.src_ip    = src.0.into();
        record.src_port  = Some(src.1);
        record.dst_ip    = dst.0.into();
        record.dst_port  = Some(dst.1);
        record.protocol  = Some(6);
        record.tcp_flags = flags;
        record
    }

    /// An ICMP record at `ms` milliseconds.
    pub fn icmp(frame: u64, ms: i64, src: &str, dst: &str) -> PacketRecord {
        let mut record = PacketRecord::new(frame, at(ms), 98);
        record.src_ip   = src.into();
        record.dst_ip   = dst.into();
        record.protocol = Some(1);
        record
    }
}
