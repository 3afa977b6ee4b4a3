//! Telnet password guessing.
//!
//! Telnet carries the login dialogue in clear text, one keystroke per segment
//! more often than not. Once the server sends a `login:` prompt to a client,
//! the address pair is watched: the client's keystrokes are collected per
//! client port, the server's `Password:` prompt turns what was typed into a
//! username, and `Login incorrect` turns what was typed next into a password
//! and records a failed attempt. `Connected to` means the login succeeded and
//! the pair stops being watched.

use crate::analyzer::config::{BRUTE_FORCE_THRESHOLD, BRUTE_FORCE_WINDOW_MS, TELNET_PORT};
use crate::analyzer::detection::{AttackKind, AttackRecord, AttackTracker, Phase};
use crate::analyzer::types::{AddressPair, PacketRecord, Timestamp};
use crate::analyzer::window::{SlidingWindow, Timestamped};
use crate::logger::{Event, Logger};
use std::collections::HashMap;

const LOGIN_PROMPT:    &str = "login:";
const PASSWORD_PROMPT: &str = "Password:";
const LOGIN_FAILED:    &str = "Login incorrect";
const LOGIN_SUCCEEDED: &str = "Connected to";

/// One rejected username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub username:  String,
    pub password:  String,
    pub timestamp: Timestamp,
}

impl LoginAttempt {
    pub fn credential(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl Timestamped for LoginAttempt {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Interprets typed bytes: each backspace erases the character before it,
/// then every remaining control character is dropped.
pub fn clean_keystrokes(raw: &[u8]) -> String {
    let mut typed = String::new();
    for c in String::from_utf8_lossy(raw).chars() {
        if c == '\u{8}' {
            typed.pop();
        } else {
            typed.push(c);
        }
    }
    typed.retain(|c| !c.is_control());
    typed
}

#[derive(Debug)]
pub struct BruteForceDetector {
    /// Pairs currently watched, with the dialogue segments seen for them.
    watched:   SlidingWindow<AddressPair, PacketRecord>,
    /// Failed logins per pair.
    failed:    SlidingWindow<AddressPair, LoginAttempt>,
    /// Raw client bytes since the last prompt, per pair and client port.
    typed:     HashMap<AddressPair, HashMap<u16, Vec<u8>>>,
    /// Usernames waiting for the server's verdict, per pair and client port.
    usernames: HashMap<AddressPair, HashMap<u16, String>>,
    tracker:   AttackTracker,
}

impl Default for BruteForceDetector {
    fn default() -> Self {
        Self {
            watched:   SlidingWindow::new(),
            failed:    SlidingWindow::new(),
            typed:     HashMap::new(),
            usernames: HashMap::new(),
            tracker:   AttackTracker::new(AttackKind::BruteForce),
        }
    }
}

impl BruteForceDetector {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one segment of an established connection together with its TCP
    /// payload. Returns the record of an attack that just ended.
    pub fn observe(&mut self, record: &PacketRecord, payload: &[u8], logger: &Logger) -> Option<AttackRecord> {
        let (Some(src_port), Some(dst_port)) = (record.src_port, record.dst_port) else {
            return None;
        };
        if payload.is_empty() {
            return None;
        }

        let pair = AddressPair::new(record.src_ip.as_str(), record.dst_ip.as_str());
        let finished = if self.watched.contains_key(&pair) {
            self.evaluate(&pair, record.timestamp, logger)
        } else {
            None
        };

        if src_port == TELNET_PORT {
            self.server_said(&pair, record, dst_port, payload, logger);
        } else if dst_port == TELNET_PORT && self.watched.contains_key(&pair) {
            self.watched.observe(pair.clone(), record.clone(), record.timestamp, BRUTE_FORCE_WINDOW_MS);
            self.typed
                .entry(pair)
                .or_default()
                .entry(src_port)
                .or_default()
                .extend_from_slice(payload);
        }

        self.forget_quiet_pairs(record.timestamp);
        finished
    }

    /// Drops failures and watched pairs that went quiet, with whatever was
    /// typed on them. Pairs are left alone while an attack is open so that
    /// their next segment still gets evaluated.
    fn forget_quiet_pairs(&mut self, now: Timestamp) {
        self.failed.expire(now, BRUTE_FORCE_WINDOW_MS);
        if self.tracker.in_progress() || !self.watched.expire(now, BRUTE_FORCE_WINDOW_MS) {
            return;
        }
        self.typed.retain(|pair, _| self.watched.contains_key(pair));
        self.usernames.retain(|pair, _| self.watched.contains_key(pair));
    }

    /// Ages out old evidence for `pair` and runs the start/continue/end step.
    fn evaluate(&mut self, pair: &AddressPair, now: Timestamp, logger: &Logger) -> Option<AttackRecord> {
        let watched  = self.watched.prune(pair, now, BRUTE_FORCE_WINDOW_MS).unwrap_or_default();
        let failures = self.failed.prune(pair, now, BRUTE_FORCE_WINDOW_MS).unwrap_or_default();

        let active = failures.len() >= BRUTE_FORCE_THRESHOLD;
        let start  = watched.iter().map(|r| r.timestamp).min().unwrap_or(now);
        let end    = watched.iter().map(|r| r.timestamp).max().unwrap_or(now);

        match self.tracker.update(active, start, end, logger) {
            Phase::Active(attack) => {
                for segment in watched {
                    attack.add_source(&segment.source_endpoint());
                    attack.add_target(&segment.destination_endpoint());
                }
                for attempt in failures {
                    attack.add_credential(&attempt.credential());
                }
                None
            }
            Phase::Ended(attack) => Some(attack),
            Phase::Idle => None,
        }
    }

    /// Applies one server message to the login dialogue of `client_port`.
    ///
    /// A successful login ends watching the pair and clears that port's
    /// buffers only. Failures already recorded for the pair stay in the
    /// window and keep counting, and other client ports of the pair keep
    /// their buffers until the pair goes quiet.
    fn server_said(
        &mut self,
        pair:        &AddressPair,
        record:      &PacketRecord,
        client_port: u16,
        payload:     &[u8],
        logger:      &Logger,
    ) {
        let text    = String::from_utf8_lossy(payload);
        let watched = self.watched.contains_key(pair);
        let label   = pair.to_string();

        if watched && text.contains(LOGIN_FAILED) {
            let password = self.take_typed(pair, client_port);
            let username = self
                .usernames
                .get_mut(pair)
                .and_then(|ports| ports.remove(&client_port))
                .unwrap_or_default();
            logger.log(&Event::CredentialCaptured { pair: &label, field: "password", value: &password });

            let attempt = LoginAttempt { username, password, timestamp: record.timestamp };
            self.failed.observe(pair.clone(), attempt, record.timestamp, BRUTE_FORCE_WINDOW_MS);
        } else if watched && text.contains(PASSWORD_PROMPT) {
            let username = self.take_typed(pair, client_port);
            logger.log(&Event::CredentialCaptured { pair: &label, field: "username", value: &username });
            self.usernames.entry(pair.clone()).or_default().insert(client_port, username);
        } else if watched && text.contains(LOGIN_SUCCEEDED) {
            self.take_typed(pair, client_port);
            if let Some(ports) = self.usernames.get_mut(pair) {
                ports.remove(&client_port);
            }
            self.watched.remove(pair);
            return;
        }

        // A failure notice is usually followed by a fresh prompt in the same
        // segment; either way the pair keeps being watched.
        if text.contains(LOGIN_PROMPT) {
            self.watched.observe(pair.clone(), record.clone(), record.timestamp, BRUTE_FORCE_WINDOW_MS);
        }
    }

    /// Returns what the client typed on `client_port` and starts a new capture.
    fn take_typed(&mut self, pair: &AddressPair, client_port: u16) -> String {
        self.typed
            .get_mut(pair)
            .and_then(|ports| ports.remove(&client_port))
            .map(|raw| clean_keystrokes(&raw))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn failed_attempts(&self, pair: &AddressPair) -> &[LoginAttempt] {
        self.failed.get(pair).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn is_watching(&self, pair: &AddressPair) -> bool {
        self.watched.contains_key(pair)
    }

    #[cfg(test)]
    pub fn typing_pairs(&self) -> usize {
        self.typed.len()
    }

    pub fn finish(&mut self, end: Timestamp) -> Option<AttackRecord> {
        self.tracker.finish(end)
    }
}
