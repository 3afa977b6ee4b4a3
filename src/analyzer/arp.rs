//! IP ↔ MAC consistency tracking fed by ARP requests.
//!
//! Each learned binding lives once in an arena; its IP and its MAC are both
//! indexed to the same slot, so a lookup by either address finds the same
//! binding. Bindings are never removed, only re-confirmed or contradicted.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One learned IP/MAC association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpMacBinding {
    pub ip:         String,
    pub mac:        String,
    /// Times this exact association has been observed, starting at 1.
    pub confidence: u64,
}

impl IpMacBinding {
    /// # Panics
    /// Panics if either address is empty.
    pub fn new(ip: &str, mac: &str) -> Self {
        assert!(!ip.is_empty() && !mac.is_empty(), "ARP binding needs a non-empty IP and MAC");
        Self { ip: ip.to_string(), mac: mac.to_string(), confidence: 1 }
    }
}

/// Outcome of checking one ARP request against what has been learned so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArpVerdict {
    /// Neither address was known; a binding was created.
    NewEntry,
    /// Both addresses were known and bound to each other.
    ExistingEntry,
    /// The MAC is known but claims an IP never seen with it.
    PossibleSpoofedIp,
    /// The IP is known but arrives from a MAC never seen before.
    PossibleSpoofedMac,
    /// Both addresses are known, but bound to different partners.
    PossibleImpersonation,
}

impl ArpVerdict {
    /// Whether this verdict points at a forged or hijacked address.
    pub fn is_suspicious(self) -> bool {
        !matches!(self, ArpVerdict::NewEntry | ArpVerdict::ExistingEntry)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArpVerdict::NewEntry              => "NEW_ENTRY",
            ArpVerdict::ExistingEntry         => "EXISTING_ENTRY",
            ArpVerdict::PossibleSpoofedIp     => "POSSIBLE_SPOOFED_IP",
            ArpVerdict::PossibleSpoofedMac    => "POSSIBLE_SPOOFED_MAC",
            ArpVerdict::PossibleImpersonation => "POSSIBLE_IMPERSONATION",
        }
    }
}

impl fmt::Display for ArpVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct IpMacTracker {
    bindings: Vec<IpMacBinding>,
    /// IP and MAC strings, both pointing into `bindings`.
    index:    HashMap<String, usize>,
}

impl IpMacTracker {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies the sender of one ARP request.
    pub fn query(&mut self, ip: &str, mac: &str) -> ArpVerdict {
        let by_ip  = self.index.get(ip).copied();
        let by_mac = self.index.get(mac).copied();

        match (by_ip, by_mac) {
            (None, None) => {
                let slot = self.bindings.len();
                self.bindings.push(IpMacBinding::new(ip, mac));
                self.index.insert(ip.to_string(), slot);
                self.index.insert(mac.to_string(), slot);
                ArpVerdict::NewEntry
            }
            (None, Some(_)) => ArpVerdict::PossibleSpoofedIp,
            (Some(_), None) => ArpVerdict::PossibleSpoofedMac,
            (Some(a), Some(b)) if a != b => ArpVerdict::PossibleImpersonation,
            (Some(slot), Some(_)) => {
                self.bindings[slot].confidence += 1;
                ArpVerdict::ExistingEntry
            }
        }
    }

    /// The binding an IP or MAC string is indexed under.
    pub fn get(&self, address: &str) -> Option<&IpMacBinding> {
        self.index.get(address).map(|&slot| &self.bindings[slot])
    }

    #[cfg(test)]
    pub fn bindings(&self) -> &[IpMacBinding] {
        &self.bindings
    }
}
