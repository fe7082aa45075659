//! Signal bookkeeping.
//!
//! A signal carries no payload, so "has this key seen it" cannot live in the
//! ledger slot alone: a key may consume a signal, unsubscribe and subscribe
//! again before the next signal fires. The [`SignalCounter`] numbers every
//! signal; [`SignalCursors`] remembers the last number each key consumed.
//! A cursor lives as long as the key has a registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::SubscriberKey;

/// Monotonic count of signals issued on a channel.
///
/// Safe to bump from any thread; readers on the designated context always
/// see the latest count.
#[derive(Debug, Default)]
pub struct SignalCounter {
    issued: AtomicU64,
}

impl SignalCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new signal and return its index (starting at 1).
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Number of signals issued so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }
}

/// Last signal index delivered to each key.
#[derive(Debug, Clone, Default)]
pub struct SignalCursors {
    delivered: HashMap<SubscriberKey, u64>,
}

impl SignalCursors {
    /// Create an empty cursor table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last index delivered to the key (0 if none).
    #[must_use]
    pub fn get(&self, key: &SubscriberKey) -> u64 {
        self.delivered.get(key).copied().unwrap_or(0)
    }

    /// Whether the key is behind `issued`.
    #[must_use]
    pub fn owes(&self, key: &SubscriberKey, issued: u64) -> bool {
        self.get(key) < issued
    }

    /// Record that the key has consumed every signal up to `index`.
    ///
    /// Cursors never move backwards.
    pub fn record(&mut self, key: &SubscriberKey, index: u64) {
        let cursor = self.delivered.entry(key.clone()).or_insert(0);
        *cursor = (*cursor).max(index);
    }

    /// Forget a key. Returns `true` if it had a cursor.
    pub fn remove(&mut self, key: &SubscriberKey) -> bool {
        self.delivered.remove(key).is_some()
    }

    /// Number of keys with a cursor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    /// Whether no key has a cursor.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_is_monotonic() {
        let counter = SignalCounter::new();
        assert_eq!(counter.issued(), 0);
        assert_eq!(counter.issue(), 1);
        assert_eq!(counter.issue(), 2);
        assert_eq!(counter.issued(), 2);
    }

    #[test]
    fn test_counter_across_threads() {
        let counter = Arc::new(SignalCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        counter.issue();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.issued(), 1000);
    }

    #[test]
    fn test_cursor_owes_until_recorded() {
        let mut cursors = SignalCursors::new();
        let key = SubscriberKey::new("a");
        assert!(!cursors.owes(&key, 0));
        assert!(cursors.owes(&key, 1));

        cursors.record(&key, 1);
        assert!(!cursors.owes(&key, 1));
        assert!(cursors.owes(&key, 2));
    }

    #[test]
    fn test_cursor_never_rewinds() {
        let mut cursors = SignalCursors::new();
        let key = SubscriberKey::new("a");
        cursors.record(&key, 5);
        cursors.record(&key, 3);
        assert_eq!(cursors.get(&key), 5);
    }

    #[test]
    fn test_removed_cursor_owes_again() {
        let mut cursors = SignalCursors::new();
        let key = SubscriberKey::new("a");
        cursors.record(&key, 2);
        assert_eq!(cursors.len(), 1);

        assert!(cursors.remove(&key));
        assert!(!cursors.remove(&key));
        assert!(cursors.is_empty());
        assert!(cursors.owes(&key, 2));
    }
}
