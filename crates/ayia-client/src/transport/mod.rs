//! Transport seam between the connection manager and the socket.
//!
//! A [`Transport`] opens an [`RpcSession`] and hands back the ordered stream
//! of [`TransportEvent`]s for it. The session owns reconnect timing; the
//! manager only reacts to the events. The stream ends when the session
//! gives up (reconnect budget spent, reconnect disabled, or closed).

pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use ayia_proto::Endpoint;

use crate::config::TransportOptions;
use crate::error::Error;

pub use ws::WsTransport;

/// Lifecycle event of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A socket was established.
    Open,
    /// An attempt or an established socket failed.
    Error {
        message: String,
        /// Reconnects made since the last successful open.
        reconnects: u32,
    },
    /// An established socket ended.
    Close { reason: String },
}

/// Handler for a server-pushed event.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A bidirectional RPC session.
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Call `method` and wait for its result.
    async fn call(&self, method: &str, params: Value) -> Result<Value, Error>;

    /// Send a notification; no reply is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error>;

    /// Route server-pushed `event` to `handler`, replacing any previous one.
    fn on(&self, event: &str, handler: EventHandler);

    /// Stop routing `event`.
    fn off(&self, event: &str);

    /// Start connecting if not already started.
    fn connect(&self);

    /// Close the socket and stop reconnecting.
    fn close(&self);

    /// Reconnects made since the last successful open.
    fn reconnect_attempts(&self) -> u32;

    /// Reconnect budget (`0` = unlimited).
    fn max_reconnects(&self) -> u32;
}

/// A freshly opened session and its event stream.
pub struct TransportSession {
    pub session: Arc<dyn RpcSession>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a session for `endpoint`.
    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
    ) -> Result<TransportSession, Error>;
}
