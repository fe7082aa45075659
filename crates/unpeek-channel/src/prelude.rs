//! Prelude module - commonly used types for convenient import.
//!
//! Use `use unpeek_channel::prelude::*;` to import all essential types.

// Channel
pub use crate::{ChannelOptions, Delivery, EventChannel, Subscription, SubscriptionKind};

// Keys and scopes
pub use crate::{LifecycleScope, Scope, SubscriberKey};

// Designated context
pub use crate::{Dispatcher, InlineDispatcher, MainContext};

// Errors
pub use crate::{ChannelError, ChannelResult, EmissionKind};

// Versioned bus
pub use crate::{ObserverId, VersionedBus};
