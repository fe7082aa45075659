//! Channel error types.

use thiserror::Error;

use crate::key::SubscriberKey;
use crate::ledger::EmissionKind;

/// Errors raised by [`EventChannel`](crate::EventChannel) and
/// [`VersionedBus`](crate::VersionedBus) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A subscriber received an emission kind it cannot consume.
    ///
    /// Raised when a payload-only subscriber is handed a signal.
    #[error("protocol violation on '{channel}' for key '{key}': expected {expected}, received {received}")]
    ProtocolViolation {
        /// Name of the channel that attempted the delivery.
        channel: String,
        /// Key whose subscriber rejected the delivery.
        key: SubscriberKey,
        /// The emission kind the subscriber accepts.
        expected: EmissionKind,
        /// The emission kind that was pending.
        received: EmissionKind,
    },

    /// A designated-context-only operation was invoked from another thread.
    #[error("'{operation}' on '{channel}' must run on the designated context")]
    OffContext {
        /// Name of the channel.
        channel: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The scope had already ended when the subscription was attempted.
    #[error("scope '{scope}' has already ended")]
    ScopeEnded {
        /// Key of the ended scope.
        scope: SubscriberKey,
    },

    /// The same observer id was registered twice on a versioned bus.
    #[error("observer {id} is already registered on '{channel}'")]
    DuplicateObserver {
        /// Name of the bus.
        channel: String,
        /// The duplicated observer id.
        id: String,
    },
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
