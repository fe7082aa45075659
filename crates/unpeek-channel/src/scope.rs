//! Observation scopes.
//!
//! A scope is whatever owns a subscription's lifetime: a screen, a session,
//! a view. The channel only needs two things from it: a key to identify it
//! and a way to be told when it ends for good.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::key::SubscriberKey;

/// Hook invoked once when a scope permanently ends.
pub type TeardownHook = Box<dyn FnOnce() + Send + 'static>;

/// An owner of subscriptions with a finite lifetime.
pub trait Scope {
    /// Key used when a subscription does not name one explicitly.
    ///
    /// Defaults to the implementing type's name, so every instance of the
    /// same scope type shares one consumption slot.
    fn scope_key(&self) -> SubscriberKey {
        SubscriberKey::of::<Self>()
    }

    /// Register `hook` to run exactly once when the scope ends.
    ///
    /// Implementations must run the hook immediately if the scope has
    /// already ended.
    fn add_teardown_hook(&self, hook: TeardownHook);

    /// Whether the scope has already ended.
    fn has_ended(&self) -> bool;
}

#[derive(Default)]
struct ScopeState {
    ended: bool,
    hooks: Vec<TeardownHook>,
}

/// A ready-made [`Scope`] that ends explicitly or when dropped.
pub struct LifecycleScope {
    key: SubscriberKey,
    state: Mutex<ScopeState>,
}

impl fmt::Debug for LifecycleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LifecycleScope")
            .field("key", &self.key)
            .field("ended", &state.ended)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

impl LifecycleScope {
    /// Create a live scope identified by `key`.
    #[must_use]
    pub fn new(key: impl Into<SubscriberKey>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(ScopeState::default()),
        }
    }

    /// Create a live scope keyed by the name of `S`.
    #[must_use]
    pub fn for_type<S: ?Sized>() -> Self {
        Self::new(SubscriberKey::of::<S>())
    }

    /// End the scope, running every registered hook.
    ///
    /// Returns the number of hooks run. Ending twice is a no-op.
    pub fn end(&self) -> usize {
        let hooks = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.ended {
                return 0;
            }
            state.ended = true;
            std::mem::take(&mut state.hooks)
        };
        let count = hooks.len();
        debug!(scope = %self.key, hooks = count, "Scope ended");
        for hook in hooks {
            hook();
        }
        count
    }
}

impl Scope for LifecycleScope {
    fn scope_key(&self) -> SubscriberKey {
        self.key.clone()
    }

    fn add_teardown_hook(&self, hook: TeardownHook) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.ended {
                state.hooks.push(hook);
                return;
            }
        }
        hook();
    }

    fn has_ended(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ended
    }
}

impl Drop for LifecycleScope {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(counter: &Arc<AtomicUsize>) -> TeardownHook {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_hooks_run_once_on_end() {
        let scope = LifecycleScope::new("screen");
        let counter = Arc::new(AtomicUsize::new(0));
        scope.add_teardown_hook(counting_hook(&counter));
        scope.add_teardown_hook(counting_hook(&counter));

        assert_eq!(scope.end(), 2);
        assert_eq!(scope.end(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(scope.has_ended());
    }

    #[test]
    fn test_hook_after_end_runs_immediately() {
        let scope = LifecycleScope::new("screen");
        scope.end();
        let counter = Arc::new(AtomicUsize::new(0));
        scope.add_teardown_hook(counting_hook(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_ends_scope() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scope = LifecycleScope::new("screen");
            scope.add_teardown_hook(counting_hook(&counter));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_scope_key_is_type_name() {
        struct Checkout;
        impl Scope for Checkout {
            fn add_teardown_hook(&self, _hook: TeardownHook) {}
            fn has_ended(&self) -> bool {
                false
            }
        }
        assert_eq!(Checkout.scope_key(), SubscriberKey::of::<Checkout>());
        assert_eq!(
            LifecycleScope::for_type::<Checkout>().scope_key(),
            SubscriberKey::of::<Checkout>()
        );
    }
}
