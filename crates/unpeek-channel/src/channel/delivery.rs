//! What a subscriber callback receives.

use std::fmt;

use crate::ledger::EmissionKind;

/// One delivery to a subscriber.
pub enum Delivery<'a, T> {
    /// A published payload.
    Value(&'a T),
    /// A payload-less signal.
    Signal,
}

impl<T> Clone for Delivery<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Delivery<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for Delivery<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Signal => f.write_str("Signal"),
        }
    }
}

impl<T: PartialEq> PartialEq for Delivery<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Signal, Self::Signal) => true,
            _ => false,
        }
    }
}

impl<'a, T> Delivery<'a, T> {
    /// The payload, or `None` for a signal.
    #[must_use]
    pub fn value(self) -> Option<&'a T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Signal => None,
        }
    }

    /// Whether this is a signal.
    #[must_use]
    pub fn is_signal(self) -> bool {
        matches!(self, Self::Signal)
    }

    /// Emission kind of this delivery.
    #[must_use]
    pub fn kind(self) -> EmissionKind {
        match self {
            Self::Value(_) => EmissionKind::Value,
            Self::Signal => EmissionKind::Signal,
        }
    }
}

/// Callback accepting both payloads and signals.
pub(crate) type EventCallback<T> = Box<dyn Fn(Delivery<'_, T>) + Send + Sync>;
/// Callback accepting payloads only.
pub(crate) type ValueCallback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A registered user callback.
pub(crate) enum Handler<T> {
    Events(EventCallback<T>),
    Values(ValueCallback<T>),
}

impl<T> Handler<T> {
    pub(crate) fn requires_payload(&self) -> bool {
        matches!(self, Self::Values(_))
    }

    /// Invoke with a payload.
    pub(crate) fn on_value(&self, value: &T) {
        match self {
            Self::Events(f) => f(Delivery::Value(value)),
            Self::Values(f) => f(value),
        }
    }

    /// Invoke with a signal. Returns `false` if the handler cannot take one.
    pub(crate) fn on_signal(&self) -> bool {
        match self {
            Self::Events(f) => {
                f(Delivery::Signal);
                true
            },
            Self::Values(_) => false,
        }
    }
}
