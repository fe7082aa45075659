//! Point-in-time view of a channel's bookkeeping, for diagnostics.

use std::fmt;

use serde::Serialize;

use super::registry::SubscriptionKind;
use crate::key::SubscriberKey;
use crate::ledger::EmissionKind;

/// State of one key at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySnapshot {
    /// The subscriber key.
    pub key: SubscriberKey,
    /// Kind of the undelivered emission, if any.
    pub pending: Option<EmissionKind>,
    /// Whether the key has subscribed at least once.
    pub observed: bool,
    /// Last signal index delivered to the key.
    pub signal_cursor: u64,
    /// Live registrations under the key.
    pub registrations: Vec<SubscriptionKind>,
}

/// State of a whole channel at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Channel name.
    pub name: String,
    /// Sticky policy.
    pub sticky: bool,
    /// Signals issued so far.
    pub signals_issued: u64,
    /// Kind of the most recent applied emission.
    pub last_emission: Option<EmissionKind>,
    /// Whether a current payload is held.
    pub has_value: bool,
    /// Kind of the write waiting in the cross-thread mailbox, if any.
    pub mailbox: Option<EmissionKind>,
    /// Per-key state, sorted by key.
    pub keys: Vec<KeySnapshot>,
}

impl ChannelSnapshot {
    /// Look up one key.
    #[must_use]
    pub fn key(&self, key: &SubscriberKey) -> Option<&KeySnapshot> {
        self.keys.iter().find(|k| &k.key == key)
    }
}

impl fmt::Display for ChannelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} (sticky={}, signals={}, last={}, mailbox={})",
            self.name,
            self.sticky,
            self.signals_issued,
            self.last_emission.map_or_else(|| "none".to_owned(), |k| k.to_string()),
            self.mailbox.map_or_else(|| "empty".to_owned(), |k| k.to_string()),
        )?;
        if self.keys.is_empty() {
            return writeln!(f, "  {{}}");
        }
        for key in &self.keys {
            let registrations: Vec<String> =
                key.registrations.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "  {}: pending={} observed={} cursor={} [{}]",
                key.key,
                key.pending.map_or_else(|| "unset".to_owned(), |k| k.to_string()),
                key.observed,
                key.signal_cursor,
                registrations.join(", "),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ChannelSnapshot {
        ChannelSnapshot {
            name: "room".to_owned(),
            sticky: true,
            signals_issued: 2,
            last_emission: Some(EmissionKind::Signal),
            has_value: false,
            mailbox: None,
            keys: vec![KeySnapshot {
                key: SubscriberKey::new("a"),
                pending: Some(EmissionKind::Signal),
                observed: true,
                signal_cursor: 1,
                registrations: vec![SubscriptionKind::Scoped, SubscriptionKind::Forever],
            }],
        }
    }

    #[test]
    fn test_display_lists_keys() {
        let rendered = snapshot().to_string();
        assert!(rendered.starts_with("room (sticky=true, signals=2, last=signal, mailbox=empty)"));
        assert!(rendered.contains("a: pending=signal observed=true cursor=1 [scoped, forever]"));
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["last_emission"], "signal");
        assert_eq!(json["keys"][0]["registrations"][1], "forever");
    }

    #[test]
    fn test_lookup_by_key() {
        let snap = snapshot();
        assert!(snap.key(&SubscriberKey::new("a")).is_some());
        assert!(snap.key(&SubscriberKey::new("b")).is_none());
    }
}
