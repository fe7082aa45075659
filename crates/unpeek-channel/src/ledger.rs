//! Per-key consumption bookkeeping.
//!
//! The ledger holds one [`Slot`] per subscriber key. Producers mark slots
//! pending; the consumer side takes a pending slot exactly once, which resets
//! it to [`Slot::Unset`]. Nothing here performs I/O or invokes callbacks.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::SubscriberKey;

/// Kind of emission carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionKind {
    /// A payload-carrying emission.
    Value,
    /// A payload-less notification.
    Signal,
}

impl fmt::Display for EmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Signal => f.write_str("signal"),
        }
    }
}

/// Delivery state of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot<T> {
    /// Nothing is pending.
    #[default]
    Unset,
    /// A payload awaits delivery.
    Value(T),
    /// A signal awaits delivery.
    Signal,
}

impl<T> Slot<T> {
    /// Whether an emission is waiting for this key.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// Kind of the pending emission, if any.
    #[must_use]
    pub fn kind(&self) -> Option<EmissionKind> {
        match self {
            Self::Unset => None,
            Self::Value(_) => Some(EmissionKind::Value),
            Self::Signal => Some(EmissionKind::Signal),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    slot: Slot<T>,
    observed: bool,
}

/// Consumption state for every key known to a channel.
#[derive(Debug, Clone)]
pub struct ConsumptionLedger<T> {
    entries: HashMap<SubscriberKey, Entry<T>>,
}

impl<T> Default for ConsumptionLedger<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> ConsumptionLedger<T> {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the key has an entry.
    #[must_use]
    pub fn contains(&self, key: &SubscriberKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create an entry for a key that has not subscribed yet.
    ///
    /// The entry starts unobserved. Returns `false` if the key already had
    /// an entry, in which case nothing changes.
    pub fn reserve(&mut self, key: SubscriberKey, seed: Slot<T>) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                slot: seed,
                observed: false,
            },
        );
        true
    }

    /// Mark a key as observed, creating its entry from `seed` if missing.
    ///
    /// Returns `true` when the entry was created by this call.
    pub fn observe(&mut self, key: &SubscriberKey, seed: impl FnOnce() -> Slot<T>) -> bool {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.observed = true;
            return false;
        }
        self.entries.insert(
            key.clone(),
            Entry {
                slot: seed(),
                observed: true,
            },
        );
        true
    }

    /// Whether the key has registered at least one live subscription.
    #[must_use]
    pub fn is_observed(&self, key: &SubscriberKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.observed)
    }

    /// Mark every eligible key as owing `value`.
    ///
    /// On a non-sticky channel unobserved keys are skipped. Returns the
    /// number of keys marked.
    pub fn mark_value(&mut self, value: &T, sticky: bool) -> usize {
        self.mark(sticky, || Slot::Value(value.clone()))
    }

    /// Mark every eligible key as owing a signal.
    pub fn mark_signal(&mut self, sticky: bool) -> usize {
        self.mark(sticky, || Slot::Signal)
    }

    fn mark(&mut self, sticky: bool, mut make: impl FnMut() -> Slot<T>) -> usize {
        let mut marked: usize = 0;
        for entry in self.entries.values_mut() {
            if !sticky && !entry.observed {
                continue;
            }
            entry.slot = make();
            marked = marked.saturating_add(1);
        }
        marked
    }

    /// Pending state of a key without consuming it.
    #[must_use]
    pub fn peek(&self, key: &SubscriberKey) -> Option<&Slot<T>> {
        self.entries.get(key).map(|e| &e.slot)
    }

    /// Consume whatever is pending for the key, leaving it unset.
    pub fn take(&mut self, key: &SubscriberKey) -> Slot<T> {
        self.entries
            .get_mut(key)
            .map(|e| std::mem::take(&mut e.slot))
            .unwrap_or_default()
    }

    /// Keys that currently owe a delivery.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<SubscriberKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.slot.is_pending())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop a key's entry. Returns `true` if one existed.
    pub fn remove(&mut self, key: &SubscriberKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Iterate `(key, slot, observed)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&SubscriberKey, &Slot<T>, bool)> {
        self.entries.iter().map(|(k, e)| (k, &e.slot, e.observed))
    }
}
