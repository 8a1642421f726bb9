//! Process-wide registry of named channels.

use std::sync::OnceLock;

use dashmap::DashMap;

use crate::channel::Channel;

/// Name of the channel returned for an empty name.
pub const DEFAULT_CHANNEL: &str = "/";

static GLOBAL_BUS: OnceLock<Bus> = OnceLock::new();

/// Registry of channels, created on first reference and kept for the life of
/// the bus.
#[derive(Debug, Default)]
pub struct Bus {
    channels: DashMap<String, Channel>,
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus.
    pub fn global() -> &'static Bus {
        GLOBAL_BUS.get_or_init(Bus::new)
    }

    /// The channel called `name`, created if absent. An empty name selects
    /// [`DEFAULT_CHANNEL`].
    pub fn channel(&self, name: &str) -> Channel {
        let name = if name.is_empty() { DEFAULT_CHANNEL } else { name };
        if let Some(channel) = self.channels.get(name) {
            return channel.value().clone();
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(channel = %name, "channel created");
                Channel::new(name)
            })
            .value()
            .clone()
    }

    /// The default channel.
    pub fn default_channel(&self) -> Channel {
        self.channel(DEFAULT_CHANNEL)
    }

    /// Names of every channel created so far.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }
}
