//! IPv4 fragment collection and reassembly.
//!
//! Fragments are grouped by the IPv4 identification field only. The decoding
//! pipeline asks for reassembly when it sees a fragment with MF clear and a
//! non-zero offset, i.e. it assumes the last fragment arrives last; the
//! reassembler itself places every fragment by offset, so earlier fragments
//! may come in any order.
//!
//! A datagram whose last fragment never shows up is forgotten once its first
//! fragment is older than [`FRAGMENT_TIMEOUT_MS`] of capture time.

use crate::analyzer::config::FRAGMENT_TIMEOUT_MS;
use crate::analyzer::types::Timestamp;
use crate::analyzer::window::window_start;
use std::collections::HashMap;
use thiserror::Error;

/// Reasons a datagram cannot be rebuilt. Neither is fatal for the capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("no fragments held for IPv4 identification {0:#06x}")]
    NotFound(u16),

    #[error("fragments for IPv4 identification {0:#06x} leave a gap")]
    Incomplete(u16),
}

/// One captured fragment: its IPv4 payload and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Byte offset of `payload` within the original datagram payload.
    pub offset:  usize,
    pub more:    bool,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Builds a fragment from the header's offset field, which counts 8-byte
    /// blocks.
    pub fn from_header(fragment_offset: u16, more: bool, payload: &[u8]) -> Self {
        Self {
            offset:  usize::from(fragment_offset) * 8,
            more,
            payload: payload.to_vec(),
        }
    }

    fn end(&self) -> usize {
        self.offset + self.payload.len()
    }
}

/// A rebuilt datagram payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub identification: u16,
    pub payload:        Vec<u8>,
}

/// Fragments of one datagram and when the first of them was captured.
#[derive(Debug)]
struct Pending {
    first_seen: Timestamp,
    fragments:  Vec<Fragment>,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u16, Pending>,
}

impl Reassembler {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&mut self, identification: u16, fragment: Fragment, now: Timestamp) {
        self.pending
            .entry(identification)
            .or_insert_with(|| Pending { first_seen: now, fragments: Vec::new() })
            .fragments
            .push(fragment);
    }

    /// Drops every datagram whose first fragment was captured more than
    /// [`FRAGMENT_TIMEOUT_MS`] before `now`. Returns how many were dropped.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let cutoff = window_start(now, FRAGMENT_TIMEOUT_MS);
        let before = self.pending.len();
        self.pending.retain(|_, held| held.first_seen >= cutoff);
        before - self.pending.len()
    }

    /// Rebuilds the datagram for `identification` and forgets its fragments.
    ///
    /// Fragments are laid out by offset; where two overlap, the one captured
    /// later wins for the shared bytes. The held fragments are dropped on both
    /// success and [`FragmentError::Incomplete`].
    pub fn reassemble(&mut self, identification: u16) -> Result<Datagram, FragmentError> {
        let fragments = self
            .pending
            .remove(&identification)
            .map(|held| held.fragments)
            .filter(|held| !held.is_empty())
            .ok_or(FragmentError::NotFound(identification))?;

        // The datagram ends where the fragment without MF ends; without one,
        // trust the furthest byte seen.
        let total = fragments
            .iter()
            .filter(|f| !f.more)
            .map(Fragment::end)
            .max()
            .or_else(|| fragments.iter().map(Fragment::end).max())
            .unwrap_or(0);

        let mut payload = vec![0u8; total];
        let mut covered = vec![false; total];

        for fragment in &fragments {
            let end = fragment.end().min(total);
            if fragment.offset >= end {
                continue;
            }
            let usable = end - fragment.offset;
            payload[fragment.offset..end].copy_from_slice(&fragment.payload[..usable]);
            covered[fragment.offset..end].iter_mut().for_each(|c| *c = true);
        }

        if covered.iter().any(|c| !c) {
            return Err(FragmentError::Incomplete(identification));
        }

        Ok(Datagram { identification, payload })
    }

    #[cfg(test)]
    pub fn is_pending(&self, identification: u16) -> bool {
        self.pending.contains_key(&identification)
    }

    /// Number of datagrams with fragments still waiting.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::detection::testing::at;

    #[test]
    fn two_fragments_concatenate_in_offset_order() {
        let mut reassembler = Reassembler::new();
        reassembler.add_fragment(0x1234, Fragment::from_header(0, true, &[1u8; 16]), at(0));
        reassembler.add_fragment(0x1234, Fragment::from_header(2, false, &[2u8; 16]), at(0));

        let datagram = reassembler.reassemble(0x1234).unwrap();
        assert_eq!(datagram.identification, 0x1234);
        assert_eq!(datagram.payload.len(), 32);
        assert_eq!(&datagram.payload[0..16], &[1u8; 16]);
        assert_eq!(&datagram.payload[16..32], &[2u8; 16]);
        assert!(!reassembler.is_pending(0x1234));
    }

    #[test]
    fn fragments_added_out_of_order_are_sorted() {
        let mut reassembler = Reassembler::new();
        reassembler.add_fragment(7, Fragment::from_header(1, true, b"BBBBBBBB"), at(0));
        reassembler.add_fragment(7, Fragment::from_header(0, true, b"AAAAAAAA"), at(0));
        reassembler.add_fragment(7, Fragment::from_header(2, false, b"CC"), at(0));

        let datagram = reassembler.reassemble(7).unwrap();
        assert_eq!(datagram.payload, b"AAAAAAAABBBBBBBBCC".to_vec());
    }

    #[test]
    fn unknown_identification_is_not_found() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.reassemble(99), Err(FragmentError::NotFound(99)));
    }

    #[test]
    fn gap_is_reported_and_fragments_dropped() {
        let mut reassembler = Reassembler::new();
        reassembler.add_fragment(5, Fragment::from_header(0, true, &[0u8; 8]), at(0));
        reassembler.add_fragment(5, Fragment::from_header(3, false, &[0u8; 8]), at(0));

        assert_eq!(reassembler.reassemble(5), Err(FragmentError::Incomplete(5)));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn identifications_do_not_mix() {
        let mut reassembler = Reassembler::new();
        reassembler.add_fragment(1, Fragment::from_header(0, true, &[1u8; 8]), at(0));
        reassembler.add_fragment(2, Fragment::from_header(0, true, &[2u8; 8]), at(0));
        reassembler.add_fragment(1, Fragment::from_header(1, false, &[3u8; 8]), at(0));

        let datagram = reassembler.reassemble(1).unwrap();
        assert_eq!(&datagram.payload[..8], &[1u8; 8]);
        assert!(reassembler.is_pending(2));
    }

    #[test]
    fn stale_datagrams_expire_by_capture_time() {
        let mut reassembler = Reassembler::new();
        reassembler.add_fragment(1, Fragment::from_header(0, true, &[1u8; 8]), at(0));
        reassembler.add_fragment(2, Fragment::from_header(0, true, &[2u8; 8]), at(20_000));

        assert_eq!(reassembler.expire(at(30_000)), 0);
        assert_eq!(reassembler.expire(at(30_001)), 1);
        assert!(!reassembler.is_pending(1));
        assert!(reassembler.is_pending(2));

        // A late fragment does not refresh the datagram's age.
        reassembler.add_fragment(2, Fragment::from_header(1, true, &[2u8; 8]), at(45_000));
        assert_eq!(reassembler.expire(at(50_001)), 1);
        assert_eq!(reassembler.pending(), 0);
    }
}
