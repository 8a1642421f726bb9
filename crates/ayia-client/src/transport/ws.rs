//! JSON-RPC 2.0 over WebSocket, compatible with rpc-websockets peers.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use ayia_proto::{Endpoint, Incoming, Request};

use super::{EventHandler, RpcSession, Transport, TransportEvent, TransportSession};
use crate::config::TransportOptions;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WsSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
    ) -> Result<TransportSession, Error> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(WsSession::new(endpoint.url(), options.clone(), events_tx));
        if options.auto_connect {
            session.connect();
        }
        Ok(TransportSession {
            session,
            events: events_rx,
        })
    }
}

/// A WebSocket RPC session with its own reconnect loop.
pub struct WsSession {
    shared: Arc<WsShared>,
}

struct WsShared {
    url: String,
    options: TransportOptions,
    /// Taken by the socket loop; dropped when it exits, ending the stream.
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    /// Writer for the current socket, `None` while disconnected.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: DashMap<u64, oneshot::Sender<Result<Value, Error>>>,
    handlers: DashMap<String, EventHandler>,
    next_id: AtomicU64,
    reconnects: AtomicU32,
    closed: AtomicBool,
    shutdown: Notify,
}

/// How an established socket ended.
struct SocketEnd {
    reason: String,
    error: Option<String>,
}

impl WsSession {
    fn new(
        url: String,
        options: TransportOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(WsShared::new(url, options, Some(events))),
        }
    }

    /// URL this session connects to.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    fn send(&self, request: &Request) -> Result<(), Error> {
        let text = request.to_text()?;
        let outgoing = self.shared.outgoing.lock();
        let sender = outgoing.as_ref().ok_or(Error::NotConnected)?;
        sender
            .send(Message::text(text))
            .map_err(|_| Error::NotConnected)
    }
}

#[async_trait]
impl RpcSession for WsSession {
    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        let request = Request::call(id, method, Some(params));
        if let Err(e) = self.send(&request) {
            self.shared.pending.remove(&id);
            return Err(e);
        }
        tracing::trace!(id, method, "call sent");

        rx.await
            .map_err(|_| Error::Transport(format!("call {} dropped", method)))?
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        self.send(&Request::notify(method, params))
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.shared.handlers.insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        self.shared.handlers.remove(event);
    }

    fn connect(&self) {
        let events = match self.shared.events.lock().take() {
            Some(events) => events,
            None => return,
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(socket_loop(shared, events));
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(url = %self.shared.url, "closing session");
        self.shared.shutdown.notify_one();
    }

    fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    fn max_reconnects(&self) -> u32 {
        self.shared.options.max_reconnects
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl WsShared {
    fn new(
        url: String,
        options: TransportOptions,
        events: Option<mpsc::UnboundedSender<TransportEvent>>,
    ) -> Self {
        Self {
            url,
            options,
            events: Mutex::new(events),
            outgoing: Mutex::new(None),
            pending: DashMap::new(),
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            reconnects: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    fn dispatch(&self, text: &str) {
        match Incoming::parse(text) {
            Ok(Incoming::Response { id, outcome }) => match self.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(outcome.map_err(Error::from));
                }
                None => tracing::debug!(id, "response for unknown call"),
            },
            Ok(Incoming::Notification { event, params }) => {
                let handler = self.handlers.get(&event).map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => handler(params),
                    None => tracing::trace!(event = %event, "unhandled event"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(Error::Transport(reason.to_string())));
            }
        }
    }

    async fn open_socket(&self) -> Result<WsStream, Error> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.options.max_payload_bytes);
        config.max_frame_size = Some(self.options.max_payload_bytes);

        let connector = if self.options.reject_unauthorized_tls {
            None
        } else {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| Error::Transport(format!("TLS setup failed: {}", e)))?;
            Some(Connector::NativeTls(tls))
        };

        let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
            self.url.as_str(),
            Some(config),
            false,
            connector,
        )
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(stream)
    }

    async fn drive(&self, stream: WsStream) -> SocketEnd {
        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.outgoing.lock() = Some(out_tx);

        let end = loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break SocketEnd { reason: "closed by client".to_string(), error: None };
                }
                Some(message) = out_rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        break SocketEnd { reason: "write failed".to_string(), error: Some(e.to_string()) };
                    }
                }
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.dispatch(text),
                        Err(_) => tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason),
                            None => "closed by peer".to_string(),
                        };
                        break SocketEnd { reason, error: None };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break SocketEnd { reason: "read failed".to_string(), error: Some(e.to_string()) };
                    }
                    None => break SocketEnd { reason: "stream ended".to_string(), error: None },
                },
            }
        };

        *self.outgoing.lock() = None;
        end
    }
}

/// Connect, serve, and reconnect until closed or out of budget.
async fn socket_loop(shared: Arc<WsShared>, events: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        tracing::debug!(
            url = %shared.url,
            reconnects = shared.reconnects.load(Ordering::SeqCst),
            "connecting"
        );

        match shared.open_socket().await {
            Ok(stream) if shared.closed.load(Ordering::SeqCst) => {
                tracing::debug!(url = %shared.url, "closed while connecting, dropping socket");
                drop(stream);
                break;
            }
            Ok(stream) => {
                shared.reconnects.store(0, Ordering::SeqCst);
                tracing::debug!(url = %shared.url, "socket open");
                let _ = events.send(TransportEvent::Open);

                let end = shared.drive(stream).await;
                shared.fail_pending(&end.reason);
                if let Some(message) = end.error {
                    let _ = events.send(TransportEvent::Error {
                        message,
                        reconnects: shared.reconnects.load(Ordering::SeqCst),
                    });
                }
                tracing::debug!(url = %shared.url, reason = %end.reason, "socket closed");
                let _ = events.send(TransportEvent::Close { reason: end.reason });
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error {
                    message: e.to_string(),
                    reconnects: shared.reconnects.load(Ordering::SeqCst),
                });
            }
        }

        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        let reconnects = shared.reconnects.load(Ordering::SeqCst);
        if !shared.options.may_reconnect(reconnects) {
            tracing::debug!(url = %shared.url, reconnects, "giving up");
            break;
        }
        shared.reconnects.store(reconnects + 1, Ordering::SeqCst);

        tokio::select! {
            _ = tokio::time::sleep(shared.options.reconnect_interval) => {}
            _ = shared.shutdown.notified() => break,
        }
    }

    shared.fail_pending("session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> WsShared {
        WsShared::new("ws://localhost:1".to_string(), TransportOptions::new(), None)
    }

    #[tokio::test]
    async fn test_dispatch_response() {
        let shared = shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(7, tx);

        shared.dispatch(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#);
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(shared.pending.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_error_response() {
        let shared = shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(3, tx);

        shared.dispatch(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#);
        match rx.await.unwrap() {
            Err(Error::RemoteCall { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_notification() {
        let shared = shared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        shared.handlers.insert(
            "collection.change".to_string(),
            Arc::new(move |params: Value| sink.lock().push(params)),
        );

        shared.dispatch(r#"{"notification":"collection.change","params":[{"n":1}]}"#);
        shared.dispatch(r#"{"notification":"other","params":[{"n":2}]}"#);
        shared.dispatch("not json");

        assert_eq!(*seen.lock(), vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn test_fail_pending() {
        let shared = shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(1, tx);

        shared.fail_pending("gone");
        assert!(matches!(rx.await.unwrap(), Err(Error::Transport(reason)) if reason == "gone"));
    }

    #[tokio::test]
    async fn test_call_without_socket() {
        let (events, _) = mpsc::unbounded_channel();
        let session = WsSession::new("ws://localhost:1".to_string(), TransportOptions::new(), events);

        let err = session.call("ping", json!([])).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(session.shared.pending.is_empty());
    }
}
