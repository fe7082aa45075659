//! Subscriber keys.
//!
//! A [`SubscriberKey`] names one consumption slot on a channel. Two
//! subscriptions that share a key share the slot, so an emission consumed
//! by one of them is never replayed to the other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one logical observer on a channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberKey(String);

impl SubscriberKey {
    /// Create a key from an explicit name.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key derived from a type's fully-qualified name.
    ///
    /// Every instance of the same scope type maps to the same key, so live
    /// instances of one screen type share a single consumption slot.
    #[must_use]
    pub fn of<S: ?Sized>() -> Self {
        Self(std::any::type_name::<S>().to_owned())
    }

    /// Key for subscriptions that have neither a scope nor an explicit key.
    ///
    /// Derived from the wall clock and the calling thread.
    #[must_use]
    pub fn fallback() -> Self {
        let now = chrono::Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros());
        let thread = std::thread::current().id();
        Self(format!("anonymous:{thread:?}:{nanos}"))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SubscriberKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for SubscriberKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProfileScreen;

    #[test]
    fn test_type_key_is_stable() {
        assert_eq!(SubscriberKey::of::<ProfileScreen>(), SubscriberKey::of::<ProfileScreen>());
        assert!(
            SubscriberKey::of::<ProfileScreen>()
                .as_str()
                .ends_with("ProfileScreen")
        );
    }

    #[test]
    fn test_type_keys_differ_per_type() {
        assert_ne!(SubscriberKey::of::<ProfileScreen>(), SubscriberKey::of::<u32>());
    }

    #[test]
    fn test_fallback_key_shape() {
        let key = SubscriberKey::fallback();
        assert!(key.as_str().starts_with("anonymous:"));
    }

    #[test]
    fn test_serializes_transparently() {
        let key = SubscriberKey::from("room");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"room\"");
    }
}
