//! Keyed, single-consumption event channel.
//!
//! An [`EventChannel`] holds the latest payload and fans every emission out
//! to its subscribers, but each subscriber key consumes a given emission at
//! most once. Re-subscribing under a key that already consumed the current
//! emission does not replay it.
//!
//! # Sticky vs non-sticky
//!
//! A sticky channel (the default) replays the latest unconsumed emission to a
//! key the first time it subscribes. A non-sticky channel only delivers
//! emissions published after the key subscribed.
//!
//! # Threading
//!
//! Callbacks run, and bookkeeping changes, on the designated context of the
//! channel's [`Dispatcher`]. [`publish`](EventChannel::publish),
//! [`signal`](EventChannel::signal), the `subscribe*` family and
//! [`unsubscribe`](EventChannel::unsubscribe) must be called there.
//! [`publish_async`](EventChannel::publish_async) and
//! [`signal_async`](EventChannel::signal_async) may be called from any thread;
//! they park the write in a single-slot mailbox that the designated context
//! drains. A write that lands before the previous one drained replaces it.

mod delivery;
mod registry;
mod snapshot;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace, warn};

pub use delivery::Delivery;
pub use registry::SubscriptionKind;
pub use snapshot::{ChannelSnapshot, KeySnapshot};

use delivery::Handler;
use registry::{Registration, Registry};

use crate::context::Dispatcher;
use crate::error::{ChannelError, ChannelResult};
use crate::key::SubscriberKey;
use crate::ledger::{ConsumptionLedger, EmissionKind, Slot};
use crate::lifecycle::{LifecycleBinding, RegistrationId, ReleaseTarget};
use crate::scope::Scope;
use crate::signal::{SignalCounter, SignalCursors};

/// Default channel name.
pub const DEFAULT_CHANNEL_NAME: &str = "event-channel";

/// Construction options for an [`EventChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Name used in logs, errors and snapshots.
    pub name: String,
    /// Whether late subscribers receive the latest unconsumed emission.
    pub sticky: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL_NAME.to_owned(),
            sticky: true,
        }
    }
}

impl ChannelOptions {
    /// Sticky options with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the sticky policy.
    #[must_use]
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }
}

/// Handle describing one registration.
#[derive(Debug, Clone)]
pub struct Subscription {
    key: SubscriberKey,
    kind: SubscriptionKind,
    id: RegistrationId,
    binding: Option<LifecycleBinding>,
}

impl Subscription {
    /// Key the subscription consumes under.
    #[must_use]
    pub fn key(&self) -> &SubscriberKey {
        &self.key
    }

    /// Scoped or forever.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Registration id.
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Scope binding, for scoped subscriptions.
    #[must_use]
    pub fn binding(&self) -> Option<&LifecycleBinding> {
        self.binding.as_ref()
    }
}

enum PendingWrite<T> {
    Value(T),
    Signal,
}

impl<T> PendingWrite<T> {
    fn kind(&self) -> EmissionKind {
        match self {
            Self::Value(_) => EmissionKind::Value,
            Self::Signal => EmissionKind::Signal,
        }
    }
}

enum Removal {
    /// Scoped registration first, forever otherwise.
    Any,
    /// Only this exact registration.
    Exact(SubscriptionKind, RegistrationId),
}

struct ChannelState<T> {
    current: Option<T>,
    last_emission: Option<EmissionKind>,
    ledger: ConsumptionLedger<T>,
    cursors: SignalCursors,
    registry: Registry<T>,
    dispatching: bool,
    redispatch: bool,
}

struct Shared<T> {
    this: Weak<Shared<T>>,
    name: String,
    sticky: bool,
    signals: SignalCounter,
    next_id: AtomicU64,
    mailbox: Mutex<Option<PendingWrite<T>>>,
    state: Mutex<ChannelState<T>>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// A keyed, single-consumption event channel.
///
/// Cloning yields another handle to the same channel.
pub struct EventChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventChannel")
            .field("name", &self.shared.name)
            .field("sticky", &self.shared.sticky)
            .field("signals_issued", &self.shared.signals.issued())
            .field("last_emission", &state.last_emission)
            .field("keys", &state.ledger.len())
            .field("registrations", &state.registry.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    /// Create a sticky channel.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_options(ChannelOptions::default(), dispatcher)
    }

    /// Create a non-sticky channel.
    #[must_use]
    pub fn non_sticky(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_options(ChannelOptions::default().with_sticky(false), dispatcher)
    }

    /// Create a channel from explicit options.
    #[must_use]
    pub fn with_options(options: ChannelOptions, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            this: this.clone(),
            name: options.name,
            sticky: options.sticky,
            signals: SignalCounter::new(),
            next_id: AtomicU64::new(1),
            mailbox: Mutex::new(None),
            state: Mutex::new(ChannelState {
                current: None,
                last_emission: None,
                ledger: ConsumptionLedger::new(),
                cursors: SignalCursors::new(),
                registry: Registry::new(),
                dispatching: false,
                redispatch: false,
            }),
            dispatcher,
        });
        debug!(channel = %shared.name, sticky = shared.sticky, "Event channel created");
        Self { shared }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Sticky policy.
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.shared.sticky
    }

    /// A clone of the current payload.
    ///
    /// `None` before the first publish and after a signal.
    #[must_use]
    pub fn current_value(&self) -> Option<T> {
        self.shared.lock_state().current.clone()
    }

    /// Kind of the most recently applied emission.
    #[must_use]
    pub fn last_emission(&self) -> Option<EmissionKind> {
        self.shared.lock_state().last_emission
    }

    /// Number of signals issued, including ones still in the mailbox.
    #[must_use]
    pub fn signals_issued(&self) -> u64 {
        self.shared.signals.issued()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock_state().registry.len()
    }

    /// Publish a payload and deliver it.
    ///
    /// Returns the number of callbacks invoked. A publish issued from inside
    /// a callback returns `Ok(0)`; its deliveries run once the outer
    /// delivery pass finishes.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context, or the first
    /// [`ChannelError::ProtocolViolation`] raised during delivery.
    pub fn publish(&self, value: T) -> ChannelResult<usize> {
        self.shared.ensure_current("publish")?;
        self.shared.apply(PendingWrite::Value(value));
        self.shared.dispatch_pending()
    }

    /// Emit a payload-less signal and deliver it.
    ///
    /// # Errors
    ///
    /// As for [`publish`](Self::publish). Payload-only subscribers that are
    /// owed the signal raise [`ChannelError::ProtocolViolation`].
    pub fn signal(&self) -> ChannelResult<usize> {
        self.shared.ensure_current("signal")?;
        let index = self.shared.signals.issue();
        trace!(channel = %self.shared.name, index, "Signal issued");
        self.shared.apply(PendingWrite::Signal);
        self.shared.dispatch_pending()
    }

    /// Publish from any thread.
    ///
    /// The payload is applied when the designated context drains the
    /// mailbox. If another async write lands first, only the latest survives.
    pub fn publish_async(&self, value: T) {
        self.shared.post(PendingWrite::Value(value));
    }

    /// Signal from any thread.
    ///
    /// The signal index is taken immediately; delivery follows the same
    /// mailbox rules as [`publish_async`](Self::publish_async).
    pub fn signal_async(&self) {
        let index = self.shared.signals.issue();
        trace!(channel = %self.shared.name, index, "Signal issued (async)");
        self.shared.post(PendingWrite::Signal);
    }

    /// Subscribe for the lifetime of `scope`, receiving payloads and signals.
    ///
    /// `key` defaults to the scope's key. A key's first subscription on a
    /// sticky channel is handed the latest unconsumed emission right away.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn subscribe<S, F>(
        &self,
        scope: &S,
        key: Option<SubscriberKey>,
        on_event: F,
    ) -> ChannelResult<Subscription>
    where
        S: Scope + ?Sized,
        F: Fn(Delivery<'_, T>) + Send + Sync + 'static,
    {
        self.subscribe_scoped(scope, key, Handler::Events(Box::new(on_event)))
    }

    /// Subscribe for the lifetime of `scope`, receiving payloads only.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ProtocolViolation`] if the key is owed a signal at
    /// subscription time; nothing is registered in that case.
    pub fn subscribe_values<S, F>(
        &self,
        scope: &S,
        key: Option<SubscriberKey>,
        on_value: F,
    ) -> ChannelResult<Subscription>
    where
        S: Scope + ?Sized,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_scoped(scope, key, Handler::Values(Box::new(on_value)))
    }

    /// Subscribe without a scope, receiving payloads and signals.
    ///
    /// `key` defaults to [`SubscriberKey::fallback`]. Release with
    /// [`unsubscribe`](Self::unsubscribe) or [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn subscribe_forever<F>(
        &self,
        key: Option<SubscriberKey>,
        on_event: F,
    ) -> ChannelResult<Subscription>
    where
        F: Fn(Delivery<'_, T>) + Send + Sync + 'static,
    {
        self.subscribe_unscoped(key, Handler::Events(Box::new(on_event)))
    }

    /// Subscribe without a scope, receiving payloads only.
    ///
    /// # Errors
    ///
    /// As for [`subscribe_values`](Self::subscribe_values).
    pub fn subscribe_values_forever<F>(
        &self,
        key: Option<SubscriberKey>,
        on_value: F,
    ) -> ChannelResult<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_unscoped(key, Handler::Values(Box::new(on_value)))
    }

    /// Release a registration under `key`.
    ///
    /// The scoped registration goes first; with none present the forever
    /// registration is released instead. The key's consumption state is
    /// discarded once no registration remains, so a later subscription under
    /// the same key starts fresh. Returns whether anything was released.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn unsubscribe(&self, key: &SubscriberKey) -> ChannelResult<bool> {
        self.shared.ensure_current("unsubscribe")?;
        Ok(self.shared.unregister(key, &Removal::Any))
    }

    /// Release exactly the registration described by `subscription`.
    ///
    /// A stale handle (its registration already replaced or released) is a
    /// no-op returning `false`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn cancel(&self, subscription: &Subscription) -> ChannelResult<bool> {
        self.shared.ensure_current("cancel")?;
        if let Some(binding) = &subscription.binding
            && binding.is_released()
        {
            return Ok(false);
        }
        let removed = self.shared.unregister(
            &subscription.key,
            &Removal::Exact(subscription.kind, subscription.id),
        );
        if let Some(binding) = &subscription.binding {
            binding.teardown();
        }
        Ok(removed)
    }

    /// Create a consumption slot for a key that will subscribe later.
    ///
    /// The slot is seeded like a first subscription and, on a sticky
    /// channel, keeps collecting emissions until the key subscribes. A
    /// non-sticky channel leaves it untouched until then. Returns `false`
    /// if the key already has a slot.
    ///
    /// # Errors
    ///
    /// [`ChannelError::OffContext`] off the designated context.
    pub fn reserve(&self, key: SubscriberKey) -> ChannelResult<bool> {
        self.shared.ensure_current("reserve")?;
        let mut state = self.shared.lock_state();
        let seed = self.shared.seed(&state, &key);
        let created = state.ledger.reserve(key.clone(), seed);
        if created {
            debug!(channel = %self.shared.name, key = %key, "Key reserved");
        }
        Ok(created)
    }

    /// Apply any mailbox write and deliver it now.
    ///
    /// The dispatcher does this on its own; calling it directly lets an
    /// embedding loop flush before rendering.
    ///
    /// # Errors
    ///
    /// As for [`publish`](Self::publish).
    pub fn flush(&self) -> ChannelResult<usize> {
        self.shared.ensure_current("flush")?;
        self.shared.drain_mailbox()
    }

    /// Capture the channel's bookkeeping for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        let mailbox = self
            .shared
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(PendingWrite::kind);
        let state = self.shared.lock_state();
        let mut keys: Vec<KeySnapshot> = state
            .ledger
            .iter()
            .map(|(key, slot, observed)| KeySnapshot {
                key: key.clone(),
                pending: slot.kind(),
                observed,
                signal_cursor: state.cursors.get(key),
                registrations: state.registry.kinds(key),
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        ChannelSnapshot {
            name: self.shared.name.clone(),
            sticky: self.shared.sticky,
            signals_issued: self.shared.signals.issued(),
            last_emission: state.last_emission,
            has_value: state.current.is_some(),
            mailbox,
            keys,
        }
    }

    fn subscribe_scoped<S: Scope + ?Sized>(
        &self,
        scope: &S,
        key: Option<SubscriberKey>,
        handler: Handler<T>,
    ) -> ChannelResult<Subscription> {
        self.shared.ensure_current("subscribe")?;
        let key = key.unwrap_or_else(|| scope.scope_key());
        let id = self
            .shared
            .register(&key, SubscriptionKind::Scoped, handler)?;

        let target: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        let target: Weak<dyn ReleaseTarget> = target;
        let binding = LifecycleBinding::bind(scope, target, key.clone(), id);

        self.shared.dispatch_pending()?;
        Ok(Subscription {
            key,
            kind: SubscriptionKind::Scoped,
            id,
            binding: Some(binding),
        })
    }

    fn subscribe_unscoped(
        &self,
        key: Option<SubscriberKey>,
        handler: Handler<T>,
    ) -> ChannelResult<Subscription> {
        self.shared.ensure_current("subscribe_forever")?;
        let key = key.unwrap_or_else(SubscriberKey::fallback);
        let id = self
            .shared
            .register(&key, SubscriptionKind::Forever, handler)?;
        self.shared.dispatch_pending()?;
        Ok(Subscription {
            key,
            kind: SubscriptionKind::Forever,
            id,
            binding: None,
        })
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn lock_state(&self) -> MutexGuard<'_, ChannelState<T>> {
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

    /// Slot a key gets on its first registration.
    fn seed(&self, state: &ChannelState<T>, key: &SubscriberKey) -> Slot<T> {
        if !self.sticky {
            return Slot::Unset;
        }
        match state.last_emission {
            Some(EmissionKind::Signal) if state.cursors.owes(key, self.signals.issued()) => {
                Slot::Signal
            },
            Some(EmissionKind::Value) => state.current.clone().map_or(Slot::Unset, Slot::Value),
            _ => Slot::Unset,
        }
    }

    fn register(
        &self,
        key: &SubscriberKey,
        kind: SubscriptionKind,
        handler: Handler<T>,
    ) -> ChannelResult<RegistrationId> {
        let mut state = self.lock_state();

        let seed = (!state.ledger.contains(key)).then(|| self.seed(&state, key));
        let pending = match &seed {
            Some(slot) => slot.kind(),
            None => state.ledger.peek(key).and_then(Slot::kind),
        };
        if handler.requires_payload() && pending == Some(EmissionKind::Signal) {
            warn!(channel = %self.name, key = %key, "Payload-only subscriber owed a signal");
            return Err(ChannelError::ProtocolViolation {
                channel: self.name.clone(),
                key: key.clone(),
                expected: EmissionKind::Value,
                received: EmissionKind::Signal,
            });
        }

        let first = seed.is_some();
        state.ledger.observe(key, || seed.unwrap_or_default());

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration {
            id,
            handler: Arc::new(handler),
        };
        if let Some(replaced) = state.registry.insert(key.clone(), kind, registration) {
            warn!(
                channel = %self.name,
                key = %key,
                kind = %kind,
                replaced = %replaced,
                "Callback replaced for key"
            );
        }
        debug!(channel = %self.name, key = %key, kind = %kind, id = %id, first, "Subscriber registered");
        Ok(id)
    }

    fn unregister(&self, key: &SubscriberKey, removal: &Removal) -> bool {
        let mut state = self.lock_state();
        let removed = match removal {
            Removal::Any => state
                .registry
                .remove_kind(key, SubscriptionKind::Scoped)
                .or_else(|| state.registry.remove_kind(key, SubscriptionKind::Forever))
                .is_some(),
            Removal::Exact(kind, id) => state.registry.remove_exact(key, *kind, *id),
        };
        if state.registry.is_registered(key) {
            if removed {
                debug!(channel = %self.name, key = %key, "Registration released, key still observed");
            }
            return removed;
        }
        let discarded = state.ledger.remove(key);
        state.cursors.remove(key);
        if removed || discarded {
            debug!(channel = %self.name, key = %key, "Key released");
        }
        removed || (discarded && matches!(removal, Removal::Any))
    }

    fn apply(&self, write: PendingWrite<T>) {
        let mut state = self.lock_state();
        match write {
            PendingWrite::Value(value) => {
                let marked = state.ledger.mark_value(&value, self.sticky);
                state.current = Some(value);
                state.last_emission = Some(EmissionKind::Value);
                trace!(channel = %self.name, marked, "Value applied");
            },
            PendingWrite::Signal => {
                let marked = state.ledger.mark_signal(self.sticky);
                state.current = None;
                state.last_emission = Some(EmissionKind::Signal);
                trace!(channel = %self.name, marked, "Signal applied");
            },
        }
    }

    fn post(&self, write: PendingWrite<T>) {
        let schedule = {
            let mut mailbox = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner);
            let replaced = mailbox.replace(write);
            if let Some(previous) = &replaced {
                debug!(
                    channel = %self.name,
                    dropped = %previous.kind(),
                    "Pending write replaced before drain"
                );
            }
            replaced.is_none()
        };
        if schedule {
            let this = self.this.clone();
            self.dispatcher.dispatch(Box::new(move || match this.upgrade() {
                Some(shared) => shared.drain_mailbox().map(|_| ()),
                None => Ok(()),
            }));
        }
    }

    fn drain_mailbox(&self) -> ChannelResult<usize> {
        let write = self
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(write) = write else {
            return Ok(0);
        };
        self.apply(write);
        self.dispatch_pending()
    }

    /// Deliver to every registered key with a pending slot.
    ///
    /// Runs repeated passes while callbacks keep producing emissions. A
    /// nested call from inside a callback only requests another pass.
    fn dispatch_pending(&self) -> ChannelResult<usize> {
        {
            let mut state = self.lock_state();
            if state.dispatching {
                state.redispatch = true;
                return Ok(0);
            }
            state.dispatching = true;
        }

        let mut delivered: usize = 0;
        let mut first_error = None;
        loop {
            let keys: Vec<SubscriberKey> = {
                let mut state = self.lock_state();
                state.redispatch = false;
                state
                    .ledger
                    .pending_keys()
                    .into_iter()
                    .filter(|k| state.registry.is_registered(k))
                    .collect()
            };
            for key in &keys {
                match self.deliver(key) {
                    Ok(true) => delivered = delivered.saturating_add(1),
                    Ok(false) => {},
                    Err(e) => {
                        first_error.get_or_insert(e);
                    },
                }
            }
            let mut state = self.lock_state();
            if !state.redispatch {
                state.dispatching = false;
                break;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    /// Hand the key's pending emission to its primary registration.
    fn deliver(&self, key: &SubscriberKey) -> ChannelResult<bool> {
        let (slot, registration) = {
            let mut state = self.lock_state();
            let Some(registration) = state.registry.primary(key) else {
                return Ok(false);
            };
            let slot = state.ledger.take(key);
            if matches!(slot, Slot::Signal) {
                let issued = self.signals.issued();
                state.cursors.record(key, issued);
            }
            (slot, registration)
        };

        let handler = &registration.handler;
        let outcome = match slot {
            Slot::Unset => return Ok(false),
            Slot::Value(value) => {
                trace!(channel = %self.name, key = %key, id = %registration.id, "Delivering value");
                catch_unwind(AssertUnwindSafe(|| handler.on_value(&value))).map(|()| true)
            },
            Slot::Signal => {
                trace!(channel = %self.name, key = %key, id = %registration.id, "Delivering signal");
                catch_unwind(AssertUnwindSafe(|| handler.on_signal()))
            },
        };

        match outcome {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(channel = %self.name, key = %key, "Signal reached a payload-only subscriber");
                Err(ChannelError::ProtocolViolation {
                    channel: self.name.clone(),
                    key: key.clone(),
                    expected: EmissionKind::Value,
                    received: EmissionKind::Signal,
                })
            },
            Err(panic) => {
                warn!(
                    channel = %self.name,
                    key = %key,
                    error = ?panic,
                    "Subscriber panicked"
                );
                Ok(true)
            },
        }
    }
}

impl<T: Clone + Send + 'static> ReleaseTarget for Shared<T> {
    fn release_scoped(&self, key: &SubscriberKey, id: RegistrationId) {
        if self.dispatcher.is_current() {
            self.unregister(key, &Removal::Exact(SubscriptionKind::Scoped, id));
            return;
        }
        let this = self.this.clone();
        let key = key.clone();
        self.dispatcher.dispatch(Box::new(move || {
            if let Some(shared) = this.upgrade() {
                shared.unregister(&key, &Removal::Exact(SubscriptionKind::Scoped, id));
            }
            Ok(())
        }));
    }
}
