//! The `/config` document served next to the web client, and the RPC
//! endpoint it describes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Port at which the RPC service is reached over TLS.
pub const TLS_PORT: u16 = 443;

/// Location of the web-services (RPC) host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebServices {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Configuration document returned by `GET /config`.
///
/// Only `web_services` is interpreted; every other key is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// RPC endpoint location.
    pub web_services: WebServices,
    /// Remaining configuration values.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteConfig {
    /// Decode a configuration document.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// The RPC endpoint described by this document.
    pub fn endpoint(&self) -> Result<Endpoint, Error> {
        Endpoint::new(&self.web_services.host, self.web_services.port)
    }
}

/// A resolved RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint. The host must be non-empty.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, Error> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::InvalidEndpoint("empty host".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidEndpoint("port 0".to_string()));
        }
        Ok(Self { host, port })
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint is reached over TLS.
    pub fn is_tls(&self) -> bool {
        self.port == TLS_PORT
    }

    /// WebSocket URL: `wss://` on port 443, `ws://` otherwise.
    pub fn url(&self) -> String {
        let scheme = if self.is_tls() { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// HTTPS URL of the same host, used to accept a self-signed certificate
    /// in a browser.
    pub fn https_url(&self) -> String {
        format!("https://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
