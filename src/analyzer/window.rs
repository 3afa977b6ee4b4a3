//! Keyed sliding time windows.
//!
//! Every detector keeps "what happened for this key in the last N
//! milliseconds". [`SlidingWindow`] holds that per key as an insertion-ordered
//! set and prunes against the timestamp of the frame being processed, so it
//! works on capture time and never on the wall clock.

use crate::analyzer::types::{PacketRecord, Timestamp};
use chrono::Duration;
use std::collections::HashMap;
use std::hash::Hash;

/// Anything that can be aged out of a window.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl Timestamped for PacketRecord {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Earliest instant still inside a window of `window_ms` ending at `now`.
pub fn window_start(now: Timestamp, window_ms: i64) -> Timestamp {
    now - Duration::milliseconds(window_ms)
}

/// Per-key insertion-ordered sets of timestamped items.
///
/// Items are kept while `timestamp >= now - window`. Timestamps that go
/// backwards in the input are simply compared as they are; nothing is
/// reordered. [`observe`](Self::observe) and [`prune`](Self::prune) only look
/// at one key; keys that go quiet are dropped by [`expire`](Self::expire).
#[derive(Debug)]
pub struct SlidingWindow<K, T> {
    entries:    HashMap<K, Vec<T>>,
    last_sweep: Option<Timestamp>,
}

impl<K, T> Default for SlidingWindow<K, T> {
    fn default() -> Self {
        Self { entries: HashMap::new(), last_sweep: None }
    }
}

impl<K, T> SlidingWindow<K, T>
where
    K: Eq + Hash,
    T: Timestamped + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `item` under `key` (once, if an equal item is already held), drops
    /// every item for `key` older than `now - window_ms`, and returns what is
    /// left in insertion order.
    pub fn observe(&mut self, key: K, item: T, now: Timestamp, window_ms: i64) -> &[T] {
        let cutoff = window_start(now, window_ms);
        let items = self.entries.entry(key).or_default();

        if !items.contains(&item) {
            items.push(item);
        }
        items.retain(|held| held.timestamp() >= cutoff);

        items
    }

    /// Prunes `key` without adding anything. The key is forgotten entirely
    /// once nothing recent is left; the retained items are returned otherwise.
    pub fn prune(&mut self, key: &K, now: Timestamp, window_ms: i64) -> Option<&[T]> {
        let cutoff = window_start(now, window_ms);

        let emptied = match self.entries.get_mut(key) {
            Some(items) => {
                items.retain(|held| held.timestamp() >= cutoff);
                items.is_empty()
            }
            None => return None,
        };

        if emptied {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Prunes every key and forgets the ones left empty.
    ///
    /// Sweeps at most once per `window_ms` of capture time, so it can be
    /// called for every item. Returns whether a sweep ran.
    pub fn expire(&mut self, now: Timestamp, window_ms: i64) -> bool {
        let cutoff = window_start(now, window_ms);
        if self.last_sweep.is_some_and(|swept| swept >= cutoff) {
            return false;
        }

        self.entries.retain(|_, items| {
            items.retain(|held| held.timestamp() >= cutoff);
            !items.is_empty()
        });
        self.last_sweep = Some(now);
        true
    }

    /// Removes one item from `key`'s set. Returns whether it was present.
    pub fn remove_item(&mut self, key: &K, item: &T) -> bool {
        match self.entries.get_mut(key) {
            Some(items) => {
                let before = items.len();
                items.retain(|held| held != item);
                let removed = items.len() != before;
                if items.is_empty() {
                    self.entries.remove(key);
                }
                removed
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Vec<T>> {
        self.entries.remove(key)
    }

    #[cfg(test)]
    pub fn get(&self, key: &K) -> Option<&[T]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick(i64);

    impl Timestamped for Tick {
        fn timestamp(&self) -> Timestamp {
            chrono::Utc.timestamp_millis_opt(self.0).unwrap()
        }
    }

    fn at(ms: i64) -> Timestamp {
        chrono::Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn observe_prunes_strictly_older_items() {
        let mut window = SlidingWindow::new();
        window.observe("host", Tick(1_000), at(1_000), 600);
        window.observe("host", Tick(1_200), at(1_200), 600);

        // 1_000 sits exactly on the boundary and survives.
        let held = window.observe("host", Tick(1_600), at(1_600), 600);
        assert_eq!(held, &[Tick(1_000), Tick(1_200), Tick(1_600)]);

        let held = window.observe("host", Tick(1_601), at(1_601), 600);
        assert_eq!(held, &[Tick(1_200), Tick(1_600), Tick(1_601)]);
    }

    #[test]
    fn observe_keeps_duplicates_once() {
        let mut window = SlidingWindow::new();
        window.observe(1u8, Tick(10), at(10), 600);
        let held = window.observe(1u8, Tick(10), at(10), 600);
        assert_eq!(held.len(), 1);
    }

    #[test]
    fn keys_are_isolated() {
        let mut window = SlidingWindow::new();
        window.observe("a", Tick(0), at(0), 600);
        window.observe("b", Tick(5_000), at(5_000), 600);

        assert_eq!(window.get(&"a"), Some(&[Tick(0)][..]));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn backwards_timestamps_do_not_panic() {
        let mut window = SlidingWindow::new();
        window.observe("a", Tick(5_000), at(5_000), 600);
        let held = window.observe("a", Tick(1_000), at(1_000), 600);
        assert_eq!(held, &[Tick(5_000), Tick(1_000)]);
    }

    #[test]
    fn prune_forgets_empty_keys() {
        let mut window = SlidingWindow::new();
        window.observe("a", Tick(0), at(0), 600);

        assert!(window.prune(&"a", at(100), 600).is_some());
        assert!(window.prune(&"a", at(10_000), 600).is_none());
        assert!(!window.contains_key(&"a"));
        assert!(window.prune(&"missing", at(0), 600).is_none());
    }

    #[test]
    fn remove_item_only_touches_one_entry() {
        let mut window = SlidingWindow::new();
        window.observe("a", Tick(1), at(1), 600);
        window.observe("a", Tick(2), at(2), 600);

        assert!(window.remove_item(&"a", &Tick(1)));
        assert!(!window.remove_item(&"a", &Tick(1)));
        assert_eq!(window.get(&"a"), Some(&[Tick(2)][..]));
    }

    #[test]
    fn expire_forgets_quiet_keys() {
        let mut window = SlidingWindow::new();
        assert!(window.expire(at(0), 600));
        window.observe("quiet", Tick(0), at(0), 600);
        window.observe("busy", Tick(500), at(500), 600);

        // Too soon after the last sweep.
        assert!(!window.expire(at(500), 600));
        assert_eq!(window.len(), 2);

        assert!(window.expire(at(1_000), 600));
        assert!(!window.contains_key(&"quiet"));
        assert_eq!(window.get(&"busy"), Some(&[Tick(500)][..]));

        assert!(window.expire(at(5_000), 600));
        assert!(window.is_empty());
    }

    #[test]
    fn removing_the_last_item_forgets_the_key() {
        let mut window = SlidingWindow::new();
        window.observe("a", Tick(1), at(1), 600);
        assert!(window.remove_item(&"a", &Tick(1)));
        assert!(!window.contains_key(&"a"));
    }
}
