//! Connection manager: one shared, self-healing RPC connection per process.
//!
//! The manager holds a single slot:
//!
//! ```text
//! Idle ──get_connection──▶ Connecting(shared attempt) ──▶ Open(conn)
//!   ▲                               │ budget exhausted         │ close
//!   └───────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Concurrent callers of [`ConnectionManager::get_connection`] all await the
//! same attempt, so at most one connection attempt is ever outstanding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ayia_bus::{Bus, Channel};
use ayia_proto::config::TLS_PORT;
use ayia_proto::{Endpoint, COLLECTION_CHANGE_EVENT};

use crate::change::ChangeTranslator;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::endpoint::{EndpointResolver, HttpConfigResolver};
use crate::error::Error;
use crate::identity::IdentityStore;
use crate::transport::{Transport, TransportEvent, TransportSession, WsTransport};

type SharedAttempt = Shared<BoxFuture<'static, Result<Connection, Error>>>;

static GLOBAL_MANAGER: OnceLock<ConnectionManager> = OnceLock::new();

enum Slot {
    Idle,
    Connecting { attempt: u64, future: SharedAttempt },
    Open(Connection),
}

/// Hands out the process's RPC connection, creating it on demand.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) config: ClientConfig,
    resolver: Arc<dyn EndpointResolver>,
    transport: Arc<dyn Transport>,
    pub(crate) identity: IdentityStore,
    translator: ChangeTranslator,
    slot: Mutex<Slot>,
    next_attempt: AtomicU64,
    next_connection_id: AtomicU64,
    connect_attempts: AtomicU64,
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn EndpointResolver>>,
    transport: Option<Arc<dyn Transport>>,
    change_channel: Option<Channel>,
    identity: Option<IdentityStore>,
}

impl ConnectionManagerBuilder {
    /// Resolve the endpoint with `resolver` instead of fetching `/config`.
    pub fn resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Open sessions with `transport` instead of WebSockets.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Publish change notifications on `bus` instead of the global bus.
    pub fn bus(mut self, bus: &Bus) -> Self {
        self.change_channel = Some(bus.channel(&self.config.change_channel));
        self
    }

    /// Share `identity` instead of creating a fresh store.
    pub fn identity(mut self, identity: IdentityStore) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Build the manager. No connection is made until one is requested.
    pub fn build(self) -> ConnectionManager {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HttpConfigResolver::new(&self.config.config_url)));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new()));
        let channel = self
            .change_channel
            .unwrap_or_else(|| Bus::global().channel(&self.config.change_channel));

        ConnectionManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                resolver,
                transport,
                identity: self.identity.unwrap_or_default(),
                translator: ChangeTranslator::new(channel),
                slot: Mutex::new(Slot::Idle),
                next_attempt: AtomicU64::new(1),
                next_connection_id: AtomicU64::new(1),
                connect_attempts: AtomicU64::new(0),
            }),
        }
    }
}

impl ConnectionManager {
    /// Create a manager with the default resolver, transport and bus.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a manager.
    pub fn builder(config: ClientConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            resolver: None,
            transport: None,
            change_channel: None,
            identity: None,
        }
    }

    /// Make this the process-wide manager returned by [`global`](Self::global).
    pub fn install(self) -> Result<&'static ConnectionManager, Error> {
        GLOBAL_MANAGER
            .set(self)
            .map_err(|_| Error::Config("a connection manager is already installed".to_string()))?;
        Ok(Self::global())
    }

    /// The process-wide manager; a default one is created if none was
    /// installed.
    pub fn global() -> &'static ConnectionManager {
        GLOBAL_MANAGER.get_or_init(|| ConnectionManager::new(ClientConfig::default()))
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Store of the authenticated user.
    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    /// Bus channel change notifications are published on.
    pub fn change_channel(&self) -> &Channel {
        self.inner.translator.channel()
    }

    /// Transport-level open attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// The open connection, if any, without connecting.
    pub fn current(&self) -> Option<Connection> {
        match &*self.inner.slot.lock() {
            Slot::Open(conn) => Some(conn.clone()),
            _ => None,
        }
    }

    /// Return the open connection, joining or starting an attempt if needed.
    ///
    /// Every caller waiting on an attempt receives the same connection or
    /// the same error.
    pub async fn get_connection(&self) -> Result<Connection, Error> {
        let attempt = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                Slot::Open(conn) => return Ok(conn.clone()),
                Slot::Connecting { future, .. } => future.clone(),
                Slot::Idle => {
                    let attempt = self.inner.next_attempt.fetch_add(1, Ordering::SeqCst);
                    let task = tokio::spawn(Arc::clone(&self.inner).establish(attempt));
                    let future = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(Error::ConnectionFailed(format!(
                                "connection task failed: {}",
                                e
                            ))),
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Slot::Connecting {
                        attempt,
                        future: future.clone(),
                    };
                    future
                }
            }
        };
        attempt.await
    }

    /// Subscribe `conn` to change notifications. No-op if already subscribed.
    pub async fn subscribe_changes(&self, conn: &Connection) {
        self.inner.subscribe_changes(conn).await;
    }

    /// Undo [`subscribe_changes`](Self::subscribe_changes). No-op if not
    /// subscribed.
    pub async fn unsubscribe_changes(&self, conn: &Connection) {
        self.inner.unsubscribe_changes(conn).await;
    }

    /// Close the open connection, if any. The identity is kept.
    pub fn disconnect(&self) {
        let conn = {
            let mut slot = self.inner.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Open(conn) => Some(conn),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(conn) = conn {
            conn.close();
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ManagerInner> {
        &self.inner
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = match &*self.inner.slot.lock() {
            Slot::Idle => "idle".to_string(),
            Slot::Connecting { attempt, .. } => format!("connecting (attempt {})", attempt),
            Slot::Open(conn) => format!("open (connection {})", conn.id()),
        };
        f.debug_struct("ConnectionManager")
            .field("config_url", &self.inner.config.config_url)
            .field("slot", &slot)
            .finish()
    }
}

/// Whether an error before the first open ends the attempt.
fn budget_exhausted(reconnect: bool, reconnects: u32, max_reconnects: u32) -> bool {
    !reconnect || (max_reconnects != 0 && reconnects >= max_reconnects.saturating_sub(1))
}

impl ManagerInner {
    /// Run one connection attempt to completion and settle the slot.
    async fn establish(self: Arc<Self>, attempt: u64) -> Result<Connection, Error> {
        let mut endpoint = None;
        let result = self.try_establish(attempt, &mut endpoint).await;

        if let Err(e) = &result {
            tracing::error!(attempt, error = %e, "connection failed");
            if let Some(endpoint) = endpoint.filter(|endpoint| endpoint.port() == TLS_PORT) {
                tracing::warn!(
                    url = %endpoint.https_url(),
                    "the RPC service may use a certificate that must first be accepted by visiting this URL"
                );
            }

            {
                let mut slot = self.slot.lock();
                if matches!(&*slot, Slot::Connecting { attempt: a, .. } if *a == attempt) {
                    *slot = Slot::Idle;
                }
            }
            self.identity.clear();
        }

        result
    }

    async fn try_establish(
        self: &Arc<Self>,
        attempt: u64,
        resolved: &mut Option<Endpoint>,
    ) -> Result<Connection, Error> {
        let endpoint = self.resolver.resolve().await?;
        *resolved = Some(endpoint.clone());

        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        tracing::info!(attempt, endpoint = %endpoint, "opening connection");

        let options = &self.config.transport;
        let TransportSession { session, mut events } =
            self.transport.open(&endpoint, options).await?;
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let conn = Connection::new(id, endpoint, session);
        if !options.auto_connect {
            conn.connect();
        }

        // Until the first open, errors only count against the budget.
        loop {
            match events.recv().await {
                Some(TransportEvent::Open) => break,
                Some(TransportEvent::Error { message, reconnects }) => {
                    let max = conn.max_reconnects();
                    if budget_exhausted(options.reconnect, reconnects, max) {
                        conn.close();
                        return Err(Error::ConnectionFailed(format!(
                            "{} (reconnects {}/{})",
                            message,
                            reconnects + 1,
                            max
                        )));
                    }
                    tracing::warn!(
                        connection = id,
                        reconnects = reconnects + 1,
                        max_reconnects = max,
                        error = %message,
                        "connection attempt failed, retrying"
                    );
                }
                Some(TransportEvent::Close { reason }) => {
                    tracing::debug!(connection = id, reason = %reason, "close before first open");
                }
                None => {
                    conn.close();
                    return Err(Error::ConnectionFailed(
                        "transport gave up before the first open".to_string(),
                    ));
                }
            }
        }

        conn.set_state(ConnectionState::Open);
        tracing::info!(connection = id, "connection open");
        self.on_open(&conn).await;

        {
            let mut slot = self.slot.lock();
            if matches!(&*slot, Slot::Connecting { attempt: a, .. } if *a == attempt) {
                *slot = Slot::Open(conn.clone());
            }
        }

        tokio::spawn(run_events(Arc::downgrade(self), conn.clone(), events));
        Ok(conn)
    }

    /// Runs on every successful open, including reopens.
    async fn on_open(&self, conn: &Connection) {
        let id = conn.id();

        if let Some(method) = &self.config.announce_method {
            if let Err(e) = conn.notify(method, None).await {
                tracing::warn!(connection = id, error = %e, "presence announcement failed");
            }
        }

        if self.config.list_methods {
            match conn.list_methods().await {
                Ok(methods) => tracing::debug!(connection = id, ?methods, "remote methods"),
                Err(e) => tracing::debug!(connection = id, error = %e, "listing remote methods failed"),
            }
        }

        match self.identity.get() {
            Some(user) => {
                if let Err(e) = self.refresh_on(conn, &user).await {
                    tracing::warn!(
                        connection = id,
                        user = %user.user_name,
                        code = e.code,
                        error = %e.message,
                        "credential refresh failed, continuing unauthenticated"
                    );
                }
            }
            None => {
                if self.config.subscribe_on_open {
                    self.subscribe_changes(conn).await;
                }
            }
        }
    }

    async fn on_reopen(&self, conn: &Connection) {
        conn.set_state(ConnectionState::Open);

        let stale = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Idle => {
                    *slot = Slot::Open(conn.clone());
                    false
                }
                Slot::Open(current) => !current.ptr_eq(conn),
                Slot::Connecting { .. } => true,
            }
        };

        if stale {
            tracing::info!(connection = conn.id(), "superseded connection reopened, closing it");
            conn.close();
            return;
        }

        tracing::info!(connection = conn.id(), "connection reopened");
        self.on_open(conn).await;
    }

    fn on_close(&self, conn: &Connection, reason: &str) {
        tracing::info!(connection = conn.id(), reason = %reason, "connection closed");
        conn.set_state(ConnectionState::Disconnected);
        if conn.clear_changes_subscribed() {
            conn.off(COLLECTION_CHANGE_EVENT);
        }
        self.release(conn);
    }

    /// Empty the slot if it still holds `conn`.
    fn release(&self, conn: &Connection) {
        let mut slot = self.slot.lock();
        if matches!(&*slot, Slot::Open(current) if current.ptr_eq(conn)) {
            *slot = Slot::Idle;
        }
    }

    pub(crate) async fn subscribe_changes(&self, conn: &Connection) {
        if conn.mark_changes_subscribed() {
            return;
        }

        let translator = self.translator.clone();
        conn.on(
            COLLECTION_CHANGE_EVENT,
            Arc::new(move |event| translator.handle(event)),
        );

        match conn.subscribe(COLLECTION_CHANGE_EVENT).await {
            Ok(()) => tracing::debug!(connection = conn.id(), "subscribed to change notifications"),
            Err(e) => {
                tracing::warn!(connection = conn.id(), error = %e, "change subscription failed");
                if conn.clear_changes_subscribed() {
                    conn.off(COLLECTION_CHANGE_EVENT);
                }
            }
        }
    }

    pub(crate) async fn unsubscribe_changes(&self, conn: &Connection) {
        if !conn.clear_changes_subscribed() {
            return;
        }

        conn.off(COLLECTION_CHANGE_EVENT);
        match conn.unsubscribe(COLLECTION_CHANGE_EVENT).await {
            Ok(()) => tracing::debug!(connection = conn.id(), "unsubscribed from change notifications"),
            Err(e) => tracing::warn!(connection = conn.id(), error = %e, "change unsubscription failed"),
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Slot::Open(conn) = std::mem::replace(self.slot.get_mut(), Slot::Idle) {
            conn.close();
        }
    }
}

/// Lifecycle events after the first open.
async fn run_events(
    manager: Weak<ManagerInner>,
    conn: Connection,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let manager = match manager.upgrade() {
            Some(manager) => manager,
            None => break,
        };

        match event {
            TransportEvent::Open => manager.on_reopen(&conn).await,
            TransportEvent::Error { message, reconnects } => {
                tracing::warn!(
                    connection = conn.id(),
                    reconnects = reconnects + 1,
                    max_reconnects = conn.max_reconnects(),
                    error = %message,
                    "connection error"
                );
            }
            TransportEvent::Close { reason } => manager.on_close(&conn, &reason),
        }
    }

    if let Some(manager) = manager.upgrade() {
        manager.release(&conn);
    }
    conn.close();
    tracing::debug!(connection = conn.id(), "connection retired");
}
