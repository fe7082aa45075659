//! Callback registrations per key.
//!
//! Each key holds at most one scoped and one forever registration.
//! Registering again under the same key and kind replaces the previous
//! callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::delivery::Handler;
use crate::key::SubscriberKey;
use crate::lifecycle::RegistrationId;

/// How a subscription's lifetime is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// Released when its scope ends.
    Scoped,
    /// Released only by an explicit unsubscribe.
    Forever,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoped => f.write_str("scoped"),
            Self::Forever => f.write_str("forever"),
        }
    }
}

pub(crate) struct Registration<T> {
    pub(crate) id: RegistrationId,
    pub(crate) handler: Arc<Handler<T>>,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct KeyRegistrations<T> {
    scoped: Option<Registration<T>>,
    forever: Option<Registration<T>>,
}

impl<T> KeyRegistrations<T> {
    fn slot_mut(&mut self, kind: SubscriptionKind) -> &mut Option<Registration<T>> {
        match kind {
            SubscriptionKind::Scoped => &mut self.scoped,
            SubscriptionKind::Forever => &mut self.forever,
        }
    }

    fn is_empty(&self) -> bool {
        self.scoped.is_none() && self.forever.is_none()
    }
}

pub(crate) struct Registry<T> {
    keys: HashMap<SubscriberKey, KeyRegistrations<T>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Install a registration, returning the id it replaced.
    pub(crate) fn insert(
        &mut self,
        key: SubscriberKey,
        kind: SubscriptionKind,
        registration: Registration<T>,
    ) -> Option<RegistrationId> {
        let entry = self.keys.entry(key).or_insert(KeyRegistrations {
            scoped: None,
            forever: None,
        });
        entry
            .slot_mut(kind)
            .replace(registration)
            .map(|previous| previous.id)
    }

    /// The registration that receives the key's deliveries.
    ///
    /// When both kinds are present the older registration wins, so a key's
    /// slot is consumed by exactly one callback per emission.
    pub(crate) fn primary(&self, key: &SubscriberKey) -> Option<Registration<T>> {
        let entry = self.keys.get(key)?;
        match (&entry.scoped, &entry.forever) {
            (Some(s), Some(f)) => Some(if s.id < f.id { s.clone() } else { f.clone() }),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }

    /// Remove whichever registration of `kind` is present.
    pub(crate) fn remove_kind(
        &mut self,
        key: &SubscriberKey,
        kind: SubscriptionKind,
    ) -> Option<RegistrationId> {
        let entry = self.keys.get_mut(key)?;
        let removed = entry.slot_mut(kind).take().map(|r| r.id);
        if entry.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    /// Remove the registration of `kind` only if it is still `id`.
    pub(crate) fn remove_exact(
        &mut self,
        key: &SubscriberKey,
        kind: SubscriptionKind,
        id: RegistrationId,
    ) -> bool {
        let Some(entry) = self.keys.get_mut(key) else {
            return false;
        };
        let slot = entry.slot_mut(kind);
        if slot.as_ref().is_none_or(|r| r.id != id) {
            return false;
        }
        *slot = None;
        if entry.is_empty() {
            self.keys.remove(key);
        }
        true
    }

    pub(crate) fn is_registered(&self, key: &SubscriberKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Kinds registered under a key, scoped first.
    pub(crate) fn kinds(&self, key: &SubscriberKey) -> Vec<SubscriptionKind> {
        let Some(entry) = self.keys.get(key) else {
            return Vec::new();
        };
        let mut kinds = Vec::with_capacity(2);
        if entry.scoped.is_some() {
            kinds.push(SubscriptionKind::Scoped);
        }
        if entry.forever.is_some() {
            kinds.push(SubscriptionKind::Forever);
        }
        kinds
    }

    /// Number of live registrations across all keys.
    pub(crate) fn len(&self) -> usize {
        self.keys
            .values()
            .map(|e| usize::from(e.scoped.is_some()).saturating_add(usize::from(e.forever.is_some())))
            .fold(0, usize::saturating_add)
    }
}
