//! Structured logging for capsift.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to an
//! output file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON). Both the diagnostics produced while a
//! capture is replayed and the final report go through the same logger, so a
//! JSON run is machine-readable from the first line to the last.

use crate::analyzer::arp::ArpVerdict;
use chrono::Local;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

// ── Event types ──────────────────────────────────────────────────────────────

/// Importance of an event. `Trace` events are only shown with `--verbose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Info,
    Error,
}

/// All distinct event kinds that capsift can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in every JSON
/// line so consumers can filter by type without inspecting structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational status message.
    Info { message: &'a str },

    /// A capture file was opened and is about to be replayed.
    FileOpened { file: &'a str, link_type: &'a str },

    /// Analysis of a capture file stopped early.
    FileFailed { file: &'a str, error: String },

    /// An IPv4 fragment was stored until the rest of its datagram arrives.
    FragmentHeld {
        frame:          u64,
        identification: u16,
        offset:         usize,
        more_fragments: bool,
    },

    /// A datagram was rebuilt from its fragments.
    FragmentsReassembled { frame: u64, identification: u16, bytes: usize },

    /// Datagrams still missing fragments were given up on.
    FragmentsExpired { frame: u64, datagrams: usize },

    /// A datagram could not be rebuilt; the completing frame was dropped.
    ReassemblyFailed { frame: u64, reason: String },

    /// An IP payload whose protocol has no decoder.
    ProtocolSkipped { frame: u64, protocol: u8 },

    /// An ICMP or ICMPv6 echo request/reply.
    Echo {
        frame:      u64,
        kind:       &'a str,
        src:        &'a str,
        dst:        &'a str,
        identifier: u16,
        sequence:   u16,
        /// IPv4 identification of the fragments the message was rebuilt from.
        datagram:   Option<u16>,
    },

    /// A TCP segment that did not fit its flow's next state.
    TransitionRejected { frame: u64, flow: &'a str, reason: String },

    /// Verdict of the IP/MAC tracker for one ARP request.
    ArpQueried {
        frame:   u64,
        ip:      &'a str,
        mac:     &'a str,
        verdict: ArpVerdict,
    },

    /// A Telnet username or password typed by a watched client.
    CredentialCaptured { pair: &'a str, field: &'a str, value: &'a str },

    /// A detector's condition became true.
    AttackStarted { name: &'a str, start: String },

    /// A detector's condition cleared and its record was finalised.
    AttackEnded { name: &'a str, end: String },

    /// Report: headline counters for one capture file.
    BasicCounts {
        file:          &'a str,
        unique_ips:    usize,
        handshakes:    u64,
        udp_sources:   usize,
        non_ip_frames: u64,
        total_frames:  u64,
    },

    /// Report: one TCP flow with the numbers recorded at each step.
    FlowDetail {
        client:         &'a str,
        server:         &'a str,
        client_mac:     &'a str,
        server_mac:     &'a str,
        state:          &'a str,
        client_isn:     Option<u32>,
        syn_ack_ack:    Option<u32>,
        server_isn:     Option<u32>,
        handshake_seq:  Option<u32>,
        handshake_ack:  Option<u32>,
        fin_seq:        Option<u32>,
        fin_ack:        Option<u32>,
        second_fin_seq: Option<u32>,
        last_ack:       Option<u32>,
        bytes:          u64,
    },

    /// Report: occurrences of one IP protocol number.
    ProtocolCount { protocol: u8, name: &'a str, count: u64 },

    /// Report: one detected attack.
    Attack {
        name:        &'a str,
        sources:     &'a [String],
        targets:     &'a [String],
        credentials: &'a [String],
        start:       String,
        end:         String,
        duration_ms: i64,
    },

    /// Report: an ARP request contradicted a learned IP/MAC binding.
    SpoofingSuspected {
        time:      String,
        ip:        &'a str,
        mac:       &'a str,
        /// MAC learned for `ip`, if any.
        known_mac: Option<&'a str>,
        /// IP learned for `mac`, if any.
        known_ip:  Option<&'a str>,
        verdict:   ArpVerdict,
    },

    /// Totals emitted once every input file has been handled.
    SessionSummary { files: usize, failed: usize, frames: u64 },
}

impl Event<'_> {
    pub fn level(&self) -> Level {
        match self {
            Event::FragmentHeld { .. }
            | Event::FragmentsReassembled { .. }
            | Event::FragmentsExpired { .. }
            | Event::ReassemblyFailed { .. }
            | Event::ProtocolSkipped { .. }
            | Event::Echo { .. }
            | Event::TransitionRejected { .. }
            | Event::ArpQueried { .. }
            | Event::CredentialCaptured { .. }
            | Event::AttackStarted { .. }
            | Event::AttackEnded { .. } => Level::Trace,

            Event::FileFailed { .. } => Level::Error,

            _ => Level::Info,
        }
    }
}

/// How much goes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Nothing on stdout; the output file still gets every non-trace line.
    Silent,
    Normal,
    /// Trace diagnostics as well, on stdout and in the output file.
    Verbose,
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Structured logger shared by the engine and the report.
///
/// Constructed once in `main` and passed by reference to everything that
/// emits events. The `Mutex` around the file writer keeps whole lines intact.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json:      bool,
    verbosity: Verbosity,
    /// Optional buffered file writer. `None` when `--output-file` was not given.
    file:      Option<Mutex<BufWriter<File>>>,
}

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`      - Emit NDJSON instead of plain text when `true`.
    /// * `verbosity` - What reaches stdout, and whether trace events are kept.
    /// * `out_path`  - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the output file cannot be opened or created.
    pub fn new(json: bool, verbosity: Verbosity, out_path: Option<&Path>) -> io::Result<Self> {
        let file = match out_path {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, verbosity, file })
    }

    /// A logger that writes nowhere.
    #[cfg(test)]
    pub fn discard() -> Self {
        Self { json: false, verbosity: Verbosity::Silent, file: None }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    fn keeps(&self, level: Level) -> bool {
        level > Level::Trace || self.is_verbose()
    }

    /// Logs a single [`Event`], writing to stdout and optionally to the output file.
    pub fn log(&self, event: &Event) {
        if !self.keeps(event.level()) {
            return;
        }
        let to_stdout = self.verbosity != Verbosity::Silent;
        if !to_stdout && self.file.is_none() {
            return;
        }

        let line = self.format(event);

        if to_stdout {
            println!("{}", line);
        }

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    fn format(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            // Serialise to a Value first so the timestamp and level can be injected.
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
                obj.insert(
                    "level".to_string(),
                    serde_json::to_value(event.level()).unwrap_or_default(),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, plain_text(event))
        }
    }
}

fn number(value: &Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |n| n.to_string())
}

/// Formats an [`Event`] as a human-readable line (no timestamp).
fn plain_text(event: &Event) -> String {
    match event {
        Event::Info { message } =>
            format!("[INFO] {}", message),

        Event::FileOpened { file, link_type } =>
            format!("[FILE] {} ({})", file, link_type),

        Event::FileFailed { file, error } =>
            format!("[ERROR] {}: {}", file, error),

        Event::FragmentHeld { frame, identification, offset, more_fragments } =>
            format!("[TRACE] frame {}: holding fragment id={:#06x} offset={} MF={}",
                frame, identification, offset, more_fragments),

        Event::FragmentsReassembled { frame, identification, bytes } =>
            format!("[TRACE] frame {}: reassembled id={:#06x} into {} bytes", frame, identification, bytes),

        Event::FragmentsExpired { frame, datagrams } =>
            format!("[TRACE] frame {}: gave up on {} incomplete datagram(s)", frame, datagrams),

        Event::ReassemblyFailed { frame, reason } =>
            format!("[TRACE] frame {}: dropped, {}", frame, reason),

        Event::ProtocolSkipped { frame, protocol } =>
            format!("[TRACE] frame {}: no decoder for IP protocol {}", frame, protocol),

        Event::Echo { frame, kind, src, dst, identifier, sequence, datagram } => match datagram {
            Some(datagram) => format!("[TRACE] frame {}: {} {} -> {} id={} seq={} (reassembled {:#06x})",
                frame, kind, src, dst, identifier, sequence, datagram),
            None => format!("[TRACE] frame {}: {} {} -> {} id={} seq={}", frame, kind, src, dst, identifier, sequence),
        },

        Event::TransitionRejected { frame, flow, reason } =>
            format!("[TRACE] frame {}: TCP {} rejected, {}", frame, flow, reason),

        Event::ArpQueried { frame, ip, mac, verdict } =>
            format!("[TRACE] frame {}: ARP {} is-at {} => {}", frame, ip, mac, verdict),

        Event::CredentialCaptured { pair, field, value } =>
            format!("[TRACE] telnet {} captured {}: {}", pair, field, value),

        Event::AttackStarted { name, start } =>
            format!("[TRACE] *** {} detected at {}", name, start),

        Event::AttackEnded { name, end } =>
            format!("[TRACE] *** {} ended at {}", name, end),

        Event::BasicCounts { file, unique_ips, handshakes, udp_sources, non_ip_frames, total_frames } =>
            format!(
                "[COUNTS] {} | unique IPs: {} | TCP handshakes: {} | UDP sources: {} | non-IP frames: {} | total frames: {}",
                file, unique_ips, handshakes, udp_sources, non_ip_frames, total_frames
            ),

        Event::FlowDetail {
            client, server, client_mac, server_mac, state, client_isn, syn_ack_ack, server_isn, handshake_seq,
            handshake_ack, fin_seq, fin_ack, second_fin_seq, last_ack, bytes,
        } => format!(
            "[FLOW] {} -> {} ({} -> {}) {} | open seq={} ack={}/{} seq={}/{} | close {} {} {} {} | {} bytes",
            client, server, client_mac, server_mac, state,
            number(client_isn), number(syn_ack_ack), number(server_isn),
            number(handshake_seq), number(handshake_ack),
            number(fin_seq), number(fin_ack), number(second_fin_seq), number(last_ack),
            bytes
        ),

        Event::ProtocolCount { protocol, name, count } =>
            format!("[PROTO] {:>3} {:<10} {}", protocol, name, count),

        Event::Attack { name, sources, targets, credentials, start, end, duration_ms } => {
            let mut line = format!(
                "[ATTACK] {} | {} -> {} | sources: {} | targets: {} ({} ms)",
                name, start, end, sources.join(", "), targets.join(", "), duration_ms
            );
            if !credentials.is_empty() {
                line.push_str(&format!(" | credentials tried: {}", credentials.join(", ")));
            }
            line
        }

        Event::SpoofingSuspected { time, ip, mac, known_mac, known_ip, verdict } =>
            format!("[SPOOFING] {} {} / {} at {} (learned MAC {}, learned IP {})",
                verdict, ip, mac, time, known_mac.unwrap_or("-"), known_ip.unwrap_or("-")),

        Event::SessionSummary { files, failed, frames } =>
            format!("[SUMMARY] files={} failed={} frames={}", files, failed, frames),
    }
}
