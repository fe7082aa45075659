//! Delivery recorder.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use unpeek_channel::Delivery;

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded<T> {
    /// A payload.
    Value(T),
    /// A signal.
    Signal,
}

/// Captures what a subscriber callback received, in order.
///
/// Clones share the same log.
pub struct Recorder<T> {
    log: Arc<Mutex<Vec<Recorded<T>>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("log", &*self.lock())
            .finish()
    }
}

impl<T> Recorder<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Recorded<T>>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of deliveries recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of signals recorded.
    #[must_use]
    pub fn signals(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| matches!(r, Recorded::Signal))
            .count()
    }

    /// Drain and return everything recorded so far.
    #[must_use]
    pub fn take(&self) -> Vec<Recorded<T>> {
        std::mem::take(&mut *self.lock())
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Recorded<T>> {
        self.lock().clone()
    }

    /// Recorded payloads only.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Value(v) => Some(v.clone()),
                Recorded::Signal => None,
            })
            .collect()
    }

    /// Callback for `subscribe`/`subscribe_forever`.
    pub fn callback(&self) -> impl Fn(Delivery<'_, T>) + Send + Sync + 'static {
        let log = Arc::clone(&self.log);
        move |delivery: Delivery<'_, T>| {
            let entry = match delivery {
                Delivery::Value(v) => Recorded::Value(v.clone()),
                Delivery::Signal => Recorded::Signal,
            };
            log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
        }
    }

    /// Callback for the payload-only `subscribe_values*` family and
    /// `VersionedBus` observers.
    pub fn value_callback(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let log = Arc::clone(&self.log);
        move |value: &T| {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Recorded::Value(value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let recorder = Recorder::<u8>::new();
        let callback = recorder.callback();
        callback(Delivery::Value(&1));
        callback(Delivery::Signal);
        (recorder.value_callback())(&2);

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.signals(), 1);
        assert_eq!(recorder.values(), vec![1, 2]);
        assert_eq!(
            recorder.take(),
            vec![Recorded::Value(1), Recorded::Signal, Recorded::Value(2)]
        );
        assert!(recorder.is_empty());
    }
}
