//! Command-line arguments.

use std::time::Duration;

use clap::Parser;

use ayia_client::config::{
    DEFAULT_CONFIG_URL, DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_INTERVAL,
};
use ayia_client::{ClientConfig, TransportOptions};

/// Command-line arguments for the watcher.
#[derive(Parser, Debug)]
#[command(name = "ayia-watch")]
#[command(version, about = "Print Ayia change notifications", long_about = None)]
pub struct Args {
    /// Base URL serving the `/config` document.
    #[arg(long, default_value = DEFAULT_CONFIG_URL)]
    pub config_url: String,

    /// Topic to print, e.g. `users.insert`. Repeatable.
    #[arg(short, long = "topic", required = true)]
    pub topics: Vec<String>,

    /// Milliseconds between reconnect attempts.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_INTERVAL.as_millis() as u64)]
    pub reconnect_interval_ms: u64,

    /// Reconnect budget (0 = unlimited).
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECTS)]
    pub max_reconnects: u32,

    /// Do not reconnect after the socket drops.
    #[arg(long)]
    pub no_reconnect: bool,

    /// Accept invalid TLS certificates.
    #[arg(long)]
    pub insecure: bool,

    /// User to log in as; changes are subscribed after login.
    #[arg(short, long, requires = "password")]
    pub user: Option<String>,

    /// Password for `--user`.
    #[arg(short, long, requires = "user")]
    pub password: Option<String>,

    /// Subscribe to changes without logging in.
    #[arg(long, conflicts_with = "user")]
    pub subscribe: bool,
}

impl Args {
    /// Convert command-line arguments to client configuration.
    pub fn into_config(self) -> ClientConfig {
        let transport = TransportOptions::new()
            .with_reconnect(!self.no_reconnect)
            .with_reconnect_interval(Duration::from_millis(self.reconnect_interval_ms))
            .with_max_reconnects(self.max_reconnects)
            .with_reject_unauthorized_tls(!self.insecure);

        ClientConfig::new(self.config_url).with_transport(transport)
    }

    /// Credentials given on the command line.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }
}
