//! A logical RPC connection handed out by the connection manager.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use ayia_proto::jsonrpc::{METHOD_LIST_METHODS, METHOD_SUBSCRIBE, METHOD_UNSUBSCRIBE};
use ayia_proto::Endpoint;

use crate::error::Error;
use crate::transport::{EventHandler, RpcSession};

/// Transport state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; the transport may be waiting to reconnect.
    Disconnected,
    /// First socket being established.
    Connecting,
    /// Socket established.
    Open,
    /// Closed for good.
    Closed,
}

/// Handle to one logical session with the RPC peer.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    endpoint: Endpoint,
    session: Arc<dyn RpcSession>,
    state: Mutex<ConnectionState>,
    /// Whether the change-notification subscription is active.
    changes_subscribed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: u64, endpoint: Endpoint, session: Arc<dyn RpcSession>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                endpoint,
                session,
                state: Mutex::new(ConnectionState::Connecting),
                changes_subscribed: AtomicBool::new(false),
            }),
        }
    }

    /// Identifier, unique within the manager that created it.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Endpoint this connection talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Check if a socket is established.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.inner.state.lock();
        if *current != ConnectionState::Closed {
            *current = state;
        }
    }

    /// Call a remote method.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        self.inner.session.call(method, params).await
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        self.inner.session.notify(method, params).await
    }

    /// Names of the methods the peer exposes.
    pub async fn list_methods(&self) -> Result<Vec<String>, Error> {
        let result = self.call(METHOD_LIST_METHODS, json!([])).await?;
        serde_json::from_value(result).map_err(|e| Error::Protocol(e.into()))
    }

    /// Ask the peer to push `event` to this connection.
    pub async fn subscribe(&self, event: &str) -> Result<(), Error> {
        let result = self.call(METHOD_SUBSCRIBE, json!([event])).await?;
        match result.get(event).and_then(Value::as_str) {
            Some("ok") => Ok(()),
            status => Err(Error::SubscribeRefused {
                event: event.to_string(),
                status: status.map_or_else(|| result.to_string(), str::to_string),
            }),
        }
    }

    /// Ask the peer to stop pushing `event`.
    pub async fn unsubscribe(&self, event: &str) -> Result<(), Error> {
        self.call(METHOD_UNSUBSCRIBE, json!([event])).await?;
        Ok(())
    }

    /// Route pushed `event` to `handler`.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.inner.session.on(event, handler);
    }

    /// Stop routing pushed `event`.
    pub fn off(&self, event: &str) {
        self.inner.session.off(event);
    }

    /// Reconnects made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.session.reconnect_attempts()
    }

    /// Reconnect budget of the transport (`0` = unlimited).
    pub fn max_reconnects(&self) -> u32 {
        self.inner.session.max_reconnects()
    }

    /// Whether the change-notification subscription is active.
    pub fn changes_subscribed(&self) -> bool {
        self.inner.changes_subscribed.load(Ordering::SeqCst)
    }

    /// Set the change-subscription flag, returning its previous value.
    pub(crate) fn mark_changes_subscribed(&self) -> bool {
        self.inner.changes_subscribed.swap(true, Ordering::SeqCst)
    }

    /// Clear the change-subscription flag, returning its previous value.
    pub(crate) fn clear_changes_subscribed(&self) -> bool {
        self.inner.changes_subscribed.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn connect(&self) {
        self.inner.session.connect();
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        tracing::debug!(connection = self.inner.id, "connection closed by client");
        self.inner.session.close();
    }

    /// Whether both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint.url())
            .field("state", &self.state())
            .field("changes_subscribed", &self.changes_subscribed())
            .finish()
    }
}
