//! Scope-bound automatic unsubscription.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::key::SubscriberKey;
use crate::scope::Scope;

/// Identifies one registration on a channel or bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(pub(crate) u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something a [`LifecycleBinding`] can release a registration from.
pub(crate) trait ReleaseTarget: Send + Sync {
    /// Release the scoped registration `id` under `key`, if it is still the
    /// current one.
    fn release_scoped(&self, key: &SubscriberKey, id: RegistrationId);
}

struct BindingInner {
    key: SubscriberKey,
    id: RegistrationId,
    target: Weak<dyn ReleaseTarget>,
    fired: AtomicBool,
}

impl BindingInner {
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.target.upgrade() {
            Some(target) => {
                trace!(key = %self.key, id = %self.id, "Lifecycle teardown");
                target.release_scoped(&self.key, self.id);
            },
            None => trace!(key = %self.key, "Lifecycle teardown after channel dropped"),
        }
        true
    }
}

/// Ties one scoped registration to its scope's end of life.
///
/// Holds only a weak reference to the channel, so a binding never keeps a
/// channel alive. Teardown is idempotent: the first of scope end or
/// [`teardown`](Self::teardown) wins, later calls do nothing.
#[derive(Clone)]
pub struct LifecycleBinding {
    inner: Arc<BindingInner>,
}

impl fmt::Debug for LifecycleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBinding")
            .field("key", &self.inner.key)
            .field("id", &self.inner.id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl LifecycleBinding {
    /// Register a teardown hook on `scope` releasing `id` from `target`.
    ///
    /// If the scope has already ended the release happens before this
    /// returns.
    pub(crate) fn bind<S: Scope + ?Sized>(
        scope: &S,
        target: Weak<dyn ReleaseTarget>,
        key: SubscriberKey,
        id: RegistrationId,
    ) -> Self {
        let inner = Arc::new(BindingInner {
            key,
            id,
            target,
            fired: AtomicBool::new(false),
        });
        let hook_inner = Arc::clone(&inner);
        scope.add_teardown_hook(Box::new(move || {
            hook_inner.fire();
        }));
        Self { inner }
    }

    /// Release the registration now instead of waiting for the scope.
    ///
    /// Returns `false` if the binding had already fired.
    pub fn teardown(&self) -> bool {
        self.inner.fire()
    }

    /// Whether the binding has fired.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Key of the bound registration.
    #[must_use]
    pub fn key(&self) -> &SubscriberKey {
        &self.inner.key
    }
}
