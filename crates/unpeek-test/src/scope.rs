//! A hand-driven scope for tests.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use unpeek_channel::{Scope, SubscriberKey, TeardownHook};

#[derive(Default)]
struct TestScopeState {
    ended: bool,
    hooks: Vec<TeardownHook>,
}

/// A [`Scope`] that only ends when told to.
///
/// Unlike `LifecycleScope` it does not end on drop, and it counts the hooks
/// registered on it, so tests can assert that a subscription bound itself.
pub struct TestScope {
    key: SubscriberKey,
    registered: AtomicUsize,
    state: Mutex<TestScopeState>,
}

impl fmt::Debug for TestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TestScope")
            .field("key", &self.key)
            .field("ended", &state.ended)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

impl TestScope {
    /// Create a live scope identified by `key`.
    #[must_use]
    pub fn new(key: impl Into<SubscriberKey>) -> Self {
        Self {
            key: key.into(),
            registered: AtomicUsize::new(0),
            state: Mutex::new(TestScopeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TestScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// End the scope and run its hooks. Returns how many ran.
    pub fn end(&self) -> usize {
        let hooks = {
            let mut state = self.lock();
            if state.ended {
                return 0;
            }
            state.ended = true;
            std::mem::take(&mut state.hooks)
        };
        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        count
    }

    /// Total hooks ever registered.
    #[must_use]
    pub fn hooks_registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// Hooks waiting for the scope to end.
    #[must_use]
    pub fn pending_hooks(&self) -> usize {
        self.lock().hooks.len()
    }
}

impl Scope for TestScope {
    fn scope_key(&self) -> SubscriberKey {
        self.key.clone()
    }

    fn add_teardown_hook(&self, hook: TeardownHook) {
        self.registered.fetch_add(1, Ordering::AcqRel);
        {
            let mut state = self.lock();
            if !state.ended {
                state.hooks.push(hook);
                return;
            }
        }
        hook();
    }

    fn has_ended(&self) -> bool {
        self.lock().ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_hooks_run_on_end_only() {
        let scope = TestScope::new("screen");
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scope.add_teardown_hook(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(scope.pending_hooks(), 1);
        assert_eq!(scope.end(), 1);
        assert_eq!(scope.end(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scope.hooks_registered(), 1);
    }

    #[test]
    fn test_hook_after_end_runs_immediately() {
        let scope = TestScope::new("screen");
        scope.end();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scope.add_teardown_hook(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scope.pending_hooks(), 0);
    }

    #[test]
    fn test_concurrent_end_runs_every_hook() {
        for _ in 0..50 {
            let scope = TestScope::new("screen");
            let runs = Arc::new(AtomicUsize::new(0));
            std::thread::scope(|s| {
                s.spawn(|| {
                    for _ in 0..20 {
                        let counter = Arc::clone(&runs);
                        scope.add_teardown_hook(Box::new(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }));
                    }
                });
                s.spawn(|| scope.end());
            });
            assert_eq!(runs.load(Ordering::SeqCst), 20);
        }
    }

    #[test]
    fn test_debug_shows_hook_count() {
        let scope = TestScope::new("screen");
        scope.add_teardown_hook(Box::new(|| {}));
        let rendered = format!("{scope:?}");
        assert!(rendered.contains("ended: false"));
        assert!(rendered.contains("hooks: 1"));
    }
}
