//! Bridge from `unpeek_config` sections to channel types.

use std::sync::Arc;

use unpeek_config::{ChannelSection, Config, ContextSection};

use crate::channel::{ChannelOptions, EventChannel};
use crate::context::{Dispatcher, MainContext};

impl ChannelOptions {
    /// Options for the channel `name` from its config section.
    #[must_use]
    pub fn from_section(name: impl Into<String>, section: &ChannelSection) -> Self {
        Self::new(name).with_sticky(section.sticky)
    }
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    /// Build a channel from its config section.
    #[must_use]
    pub fn from_config(
        name: impl Into<String>,
        section: &ChannelSection,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self::with_options(ChannelOptions::from_section(name, section), dispatcher)
    }

    /// Build the channel `name`, looking its section up in `config`.
    #[must_use]
    pub fn named_from(name: &str, config: &Config, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::from_config(name, &config.channel(name), dispatcher)
    }
}

impl MainContext {
    /// Create a context on the current thread using the configured warning
    /// threshold.
    #[must_use]
    pub fn from_config(section: &ContextSection) -> Arc<Self> {
        Self::with_warn_threshold(section.queue_warn_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InlineDispatcher;

    #[test]
    fn test_channel_from_config() {
        let config = Config::from_toml("[channels.toast]\nsticky = false").unwrap();

        let toast: EventChannel<String> =
            EventChannel::named_from("toast", &config, Arc::new(InlineDispatcher));
        assert_eq!(toast.name(), "toast");
        assert!(!toast.is_sticky());

        let other: EventChannel<String> =
            EventChannel::named_from("profile", &config, Arc::new(InlineDispatcher));
        assert!(other.is_sticky());
    }

    #[test]
    fn test_context_from_config() {
        let ctx = MainContext::from_config(&ContextSection {
            queue_warn_threshold: 8,
        });
        assert_eq!(ctx.pending(), 0);
        assert!(ctx.is_current());
    }
}
