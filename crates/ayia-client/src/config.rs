//! Client configuration.

use std::time::Duration;

use ayia_proto::COLLECTION_CHANGE_EVENT;

/// Default base URL of the web application serving `/config`.
pub const DEFAULT_CONFIG_URL: &str = "http://127.0.0.1:3000";

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default reconnect budget.
pub const DEFAULT_MAX_RECONNECTS: u32 = 5;

/// Default maximum inbound message size (100 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Notification sent to the peer on every open.
pub const DEFAULT_ANNOUNCE_METHOD: &str = "Hello Server!";

/// Transport-level connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Connect as soon as the session is created.
    pub auto_connect: bool,

    /// Reconnect automatically when the socket drops or fails to open.
    pub reconnect: bool,

    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,

    /// Reconnect attempts before giving up. `0` means unlimited.
    pub max_reconnects: u32,

    /// Maximum inbound message and frame size in bytes.
    pub max_payload_bytes: usize,

    /// Reject invalid TLS certificates and host names.
    pub reject_unauthorized_tls: bool,
}

impl TransportOptions {
    /// Create options with the defaults.
    pub fn new() -> Self {
        Self {
            auto_connect: true,
            reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            reject_unauthorized_tls: true,
        }
    }

    /// Set whether to connect immediately.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Set whether to reconnect automatically.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the delay between reconnect attempts.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the reconnect budget.
    pub fn with_max_reconnects(mut self, max_reconnects: u32) -> Self {
        self.max_reconnects = max_reconnects;
        self
    }

    /// Set the maximum inbound message size.
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Set whether invalid TLS certificates are rejected.
    pub fn with_reject_unauthorized_tls(mut self, reject: bool) -> Self {
        self.reject_unauthorized_tls = reject;
        self
    }

    /// Whether another reconnect may follow `reconnects` completed ones.
    pub fn may_reconnect(&self, reconnects: u32) -> bool {
        self.reconnect && (self.max_reconnects == 0 || reconnects < self.max_reconnects)
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the web application; `/config` is fetched from here.
    pub config_url: String,

    /// Transport options.
    pub transport: TransportOptions,

    /// Notification announcing presence on every open. `None` disables it.
    pub announce_method: Option<String>,

    /// List remote methods on every open (diagnostics).
    pub list_methods: bool,

    /// Bus channel change notifications are republished on.
    pub change_channel: String,

    /// Subscribe to change notifications on every open, not only after
    /// authentication.
    pub subscribe_on_open: bool,
}

impl ClientConfig {
    /// Create a configuration fetching `/config` from `config_url`.
    pub fn new(config_url: impl Into<String>) -> Self {
        Self {
            config_url: config_url.into(),
            transport: TransportOptions::default(),
            announce_method: Some(DEFAULT_ANNOUNCE_METHOD.to_string()),
            list_methods: true,
            change_channel: COLLECTION_CHANGE_EVENT.to_string(),
            subscribe_on_open: false,
        }
    }

    /// Set the transport options.
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Set the presence notification.
    pub fn with_announce_method(mut self, method: Option<String>) -> Self {
        self.announce_method = method;
        self
    }

    /// Set whether remote methods are listed on open.
    pub fn with_list_methods(mut self, list_methods: bool) -> Self {
        self.list_methods = list_methods;
        self
    }

    /// Set the bus channel for change notifications.
    pub fn with_change_channel(mut self, channel: impl Into<String>) -> Self {
        self.change_channel = channel.into();
        self
    }

    /// Set whether change notifications are subscribed on every open.
    pub fn with_subscribe_on_open(mut self, subscribe: bool) -> Self {
        self.subscribe_on_open = subscribe;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_URL)
    }
}
