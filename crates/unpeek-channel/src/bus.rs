//! Version-counting payload bus.
//!
//! A lighter sibling of [`EventChannel`](crate::channel::EventChannel) with no
//! keys and no signals. Every publish bumps a version; each observer
//! remembers the last version it saw and is only called for newer ones.
//!
//! A plain observer starts at the current version, so it never sees what was
//! published before it registered. A sticky observer starts before the first
//! version and is handed the latest payload right away.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::context::Dispatcher;
use crate::error::{ChannelError, ChannelResult};
use crate::key::SubscriberKey;
use crate::lifecycle::{LifecycleBinding, RegistrationId, ReleaseTarget};
use crate::scope::Scope;

/// Version before anything was published.
pub const VERSION_START: u64 = 0;

/// Identity of one bus observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type BusCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusObserver<T> {
    last_version: u64,
    registration: RegistrationId,
    callback: BusCallback<T>,
}

struct BusState<T> {
    version: u64,
    current: Option<T>,
    observers: HashMap<ObserverId, BusObserver<T>>,
    dispatching: bool,
    redispatch: bool,
}

struct BusShared<T> {
    this: Weak<BusShared<T>>,
    name: String,
    next_registration: AtomicU64,
    mailbox: Mutex<Option<T>>,
    state: Mutex<BusState<T>>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// A version-counting payload bus.
///
/// Cloning yields another handle to the same bus.
pub struct VersionedBus<T> {
    shared: Arc<BusShared<T>>,
}

impl<T> Clone for VersionedBus<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for VersionedBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("VersionedBus")
            .field("name", &self.shared.name)
            .field("version", &state.version)
            .field("observers", &state.observers.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> VersionedBus<T> {
    /// Create a bus named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let shared = Arc::new_cyclic(|this| BusShared {
            this: this.clone(),
            name: name.into(),
            next_registration: AtomicU64::new(1),
            mailbox: Mutex::new(None),
            state: Mutex::new(BusState {
                version: VERSION_START,
                current: None,
                observers: HashMap::new(),
                dispatching: false,
                redispatch: false,
            }),
            dispatcher,
        });
        Self { shared }
    }

    /// Bus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of payloads applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.lock_state().version
    }

    /// A clone of the latest payload.
    #[must_use]
    pub fn current_value(&self) -> Option<T> {
        self.shared.lock_state().current.clone()
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.shared.lock_state().observers.len()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ObserverId) -> bool {
        self.shared.lock_state().observers.contains_key(&id)
    }

    /// Publish a payload and deliver it to every observer behind it.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn publish(&self, value: T) -> ChannelResult<usize> {
        self.shared.ensure_current("publish")?;
        self.shared.apply(value);
        Ok(self.shared.dispatch())
    }

    /// Publish from any thread; the latest undrained payload wins.
    pub fn publish_async(&self, value: T) {
        let schedule = self
            .shared
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value)
            .is_none();
        if schedule {
            let this = self.shared.this.clone();
            self.shared.dispatcher.dispatch(Box::new(move || {
                if let Some(shared) = this.upgrade() {
                    let pending = shared
                        .mailbox
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(value) = pending {
                        shared.apply(value);
                        shared.dispatch();
                    }
                }
                Ok(())
            }));
        } else {
            debug!(bus = %self.shared.name, "Pending payload replaced before drain");
        }
    }

    /// Observe for the lifetime of `scope`, starting at the current version.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ScopeEnded`] if `scope` has ended,
    /// [`ChannelError::DuplicateObserver`] if `id` is already registered.
    pub fn observe<S, F>(&self, scope: &S, id: ObserverId, on_value: F) -> ChannelResult<ObserverId>
    where
        S: Scope + ?Sized,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe_scoped(scope, id, false, Arc::new(on_value))
    }

    /// Observe for the lifetime of `scope`, replaying the latest payload.
    ///
    /// # Errors
    ///
    /// As for [`observe`](Self::observe).
    pub fn observe_sticky<S, F>(
        &self,
        scope: &S,
        id: ObserverId,
        on_value: F,
    ) -> ChannelResult<ObserverId>
    where
        S: Scope + ?Sized,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe_scoped(scope, id, true, Arc::new(on_value))
    }

    /// Observe until [`remove`](Self::remove), starting at the current version.
    ///
    /// # Errors
    ///
    /// [`ChannelError::DuplicateObserver`] if `id` is already registered.
    pub fn observe_forever<F>(&self, id: ObserverId, on_value: F) -> ChannelResult<ObserverId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.ensure_current("observe_forever")?;
        self.shared.register(id, false, Arc::new(on_value))?;
        self.shared.dispatch();
        Ok(id)
    }

    /// Observe until [`remove`](Self::remove), replaying the latest payload.
    ///
    /// # Errors
    ///
    /// As for [`observe_forever`](Self::observe_forever).
    pub fn observe_sticky_forever<F>(
        &self,
        id: ObserverId,
        on_value: F,
    ) -> ChannelResult<ObserverId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.shared.ensure_current("observe_sticky_forever")?;
        self.shared.register(id, true, Arc::new(on_value))?;
        self.shared.dispatch();
        Ok(id)
    }

    /// Remove an observer. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn remove(&self, id: ObserverId) -> ChannelResult<bool> {
        self.shared.ensure_current("remove")?;
        let removed = self.shared.lock_state().observers.remove(&id).is_some();
        if removed {
            debug!(bus = %self.shared.name, observer = %id, "Observer removed");
        }
        Ok(removed)
    }

    fn observe_scoped<S: Scope + ?Sized>(
        &self,
        scope: &S,
        id: ObserverId,
        sticky: bool,
        callback: BusCallback<T>,
    ) -> ChannelResult<ObserverId> {
        self.shared.ensure_current("observe")?;
        if scope.has_ended() {
            return Err(ChannelError::ScopeEnded {
                scope: scope.scope_key(),
            });
        }
        let registration = self.shared.register(id, sticky, callback)?;

        let target: Weak<BusShared<T>> = Arc::downgrade(&self.shared);
        let target: Weak<dyn ReleaseTarget> = target;
        LifecycleBinding::bind(scope, target, SubscriberKey::new(id.to_string()), registration);

        self.shared.dispatch();
        Ok(id)
    }
}

impl<T: Clone + Send + 'static> BusShared<T> {
    fn lock_state(&self) -> MutexGuard<'_, BusState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_current(&self, operation: &'static str) -> ChannelResult<()> {
        if self.dispatcher.is_current() {
            Ok(())
        } else {
            Err(ChannelError::OffContext {
                channel: self.name.clone(),
                operation,
            })
        }
    }

    fn register(
        &self,
        id: ObserverId,
        sticky: bool,
        callback: BusCallback<T>,
    ) -> ChannelResult<RegistrationId> {
        let mut state = self.lock_state();
        if state.observers.contains_key(&id) {
            warn!(bus = %self.name, observer = %id, "Observer registered twice");
            return Err(ChannelError::DuplicateObserver {
                channel: self.name.clone(),
                id: id.to_string(),
            });
        }
        let registration =
            RegistrationId(self.next_registration.fetch_add(1, Ordering::Relaxed));
        let last_version = if sticky { VERSION_START } else { state.version };
        state.observers.insert(
            id,
            BusObserver {
                last_version,
                registration,
                callback,
            },
        );
        debug!(bus = %self.name, observer = %id, sticky, last_version, "Observer registered");
        Ok(registration)
    }

    fn apply(&self, value: T) {
        let mut state = self.lock_state();
        state.version = state.version.saturating_add(1);
        state.current = Some(value);
        trace!(bus = %self.name, version = state.version, "Payload applied");
    }

    /// Call every observer behind the current version, repeating while
    /// callbacks publish more.
    fn dispatch(&self) -> usize {
        {
            let mut state = self.lock_state();
            if state.dispatching {
                state.redispatch = true;
                return 0;
            }
            state.dispatching = true;
        }

        let mut delivered: usize = 0;
        loop {
            let batch: Vec<(ObserverId, BusCallback<T>, T)> = {
                let mut state = self.lock_state();
                state.redispatch = false;
                let version = state.version;
                match state.current.clone() {
                    Some(value) => state
                        .observers
                        .iter_mut()
                        .filter(|(_, o)| o.last_version < version)
                        .map(|(id, o)| {
                            o.last_version = version;
                            (*id, Arc::clone(&o.callback), value.clone())
                        })
                        .collect(),
                    None => Vec::new(),
                }
            };

            for (id, callback, value) in batch {
                if !self.lock_state().observers.contains_key(&id) {
                    continue;
                }
                if let Err(e) = catch_unwind(AssertUnwindSafe(|| callback(&value))) {
                    warn!(bus = %self.name, observer = %id, error = ?e, "Observer panicked");
                }
                delivered = delivered.saturating_add(1);
            }

            let mut state = self.lock_state();
            if !state.redispatch {
                state.dispatching = false;
                break;
            }
        }
        delivered
    }

    fn release(&self, registration: RegistrationId) {
        let mut state = self.lock_state();
        let before = state.observers.len();
        state
            .observers
            .retain(|_, o| o.registration != registration);
        if state.observers.len() < before {
            debug!(bus = %self.name, registration = %registration, "Observer released by scope");
        }
    }
}

impl<T: Clone + Send + 'static> ReleaseTarget for BusShared<T> {
    fn release_scoped(&self, _key: &SubscriberKey, id: RegistrationId) {
        if self.dispatcher.is_current() {
            self.release(id);
            return;
        }
        let this = self.this.clone();
        self.dispatcher.dispatch(Box::new(move || {
            if let Some(shared) = this.upgrade() {
                shared.release(id);
            }
            Ok(())
        }));
    }
}
