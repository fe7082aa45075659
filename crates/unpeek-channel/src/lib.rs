//! Unpeek Channel - keyed, single-consumption event channels.
//!
//! An [`EventChannel`] fans emissions out to subscribers, but each
//! [`SubscriberKey`] consumes a given emission at most once. Subscriptions
//! sharing a key share one consumption slot, so an event one of them already
//! handled is never replayed to the other, while a key subscribing for the
//! first time still receives the latest event (unless the channel is
//! non-sticky).
//!
//! This crate provides:
//! - [`EventChannel`] with sticky and non-sticky replay, payloads and
//!   payload-less signals
//! - [`ConsumptionLedger`] and [`SignalCounter`], the per-key bookkeeping
//! - [`LifecycleBinding`] and the [`Scope`] capability for automatic
//!   unsubscription
//! - [`MainContext`] and [`InlineDispatcher`], designated-context dispatchers
//! - [`VersionedBus`], a simpler version-counting payload bus
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use unpeek_channel::{Delivery, EventChannel, InlineDispatcher, LifecycleScope};
//!
//! let channel: EventChannel<String> = EventChannel::new(Arc::new(InlineDispatcher));
//! channel.publish("saved".to_string())?;
//!
//! // First subscription under this key: the sticky replay is delivered.
//! let screen = LifecycleScope::new("profile-screen");
//! channel.subscribe(&screen, None, |event: Delivery<'_, String>| {
//!     if let Some(message) = event.value() {
//!         println!("toast: {message}");
//!     }
//! })?;
//!
//! // A second instance under the same key shares the slot: no replay.
//! let again = LifecycleScope::new("profile-screen");
//! channel.subscribe(&again, None, |_: Delivery<'_, String>| unreachable!())?;
//! # Ok::<(), unpeek_channel::ChannelError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod channel;
#[cfg(feature = "config")]
mod config_bridge;
mod context;
mod error;
mod key;
mod ledger;
mod lifecycle;
mod scope;
mod signal;

pub use bus::{ObserverId, VERSION_START, VersionedBus};
pub use channel::{
    ChannelOptions, ChannelSnapshot, DEFAULT_CHANNEL_NAME, Delivery, EventChannel, KeySnapshot,
    Subscription, SubscriptionKind,
};
pub use context::{DEFAULT_QUEUE_WARN_THRESHOLD, Dispatcher, InlineDispatcher, Job, MainContext};
pub use error::{ChannelError, ChannelResult};
pub use key::SubscriberKey;
pub use ledger::{ConsumptionLedger, EmissionKind, Slot};
pub use lifecycle::{LifecycleBinding, RegistrationId};
pub use scope::{LifecycleScope, Scope, TeardownHook};
pub use signal::{SignalCounter, SignalCursors};
