//! Scriptable in-memory transport for connection manager tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ayia_client::{
    ClientConfig, Error, EventHandler, RpcSession, Transport, TransportEvent, TransportOptions,
    TransportSession,
};
use ayia_proto::Endpoint;

/// How a freshly opened session behaves.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Emit `Open` after the delay.
    OpenAfter(Duration),
    /// Emit one `Error` per allowed attempt, then end the stream.
    FailAll,
    /// End the stream without any event.
    GiveUp,
    /// Emit nothing; the test drives events through the session.
    Manual,
}

type Responder = Arc<dyn Fn(&str, &Value) -> Result<Value, Error> + Send + Sync>;

/// Default peer: acknowledges subscriptions and lists no methods.
pub fn default_responder() -> Responder {
    Arc::new(|method: &str, params: &Value| match method {
        "rpc.on" => {
            let event = params[0].as_str().unwrap_or_default().to_string();
            let mut ack = serde_json::Map::new();
            ack.insert(event, json!("ok"));
            Ok(Value::Object(ack))
        }
        "rpc.off" => Ok(json!({})),
        "__listMethods" => Ok(json!(["user.authPassword", "user.authRefresh"])),
        _ => Ok(Value::Null),
    })
}

pub struct MockSession {
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    responder: Responder,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub notifications: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    reconnects: AtomicU32,
    max_reconnects: u32,
}

impl MockSession {
    /// Deliver a lifecycle event to the manager.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// End the event stream, as a transport that gave up.
    pub fn end(&self) {
        self.events.lock().take();
    }

    /// Push a server event to the registered handler.
    pub fn push(&self, event: &str, params: Value) -> bool {
        let handler = self.handlers.lock().get(event).cloned();
        match handler {
            Some(handler) => {
                handler(params);
                true
            }
            None => false,
        }
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.lock().contains_key(event)
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcSession for MockSession {
    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.calls.lock().push((method.to_string(), params.clone()));
        (self.responder)(method, &params)
    }

    async fn notify(&self, method: &str, _params: Option<Value>) -> Result<(), Error> {
        self.notifications.lock().push(method.to_string());
        Ok(())
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers.lock().insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        self.handlers.lock().remove(event);
    }

    fn connect(&self) {}

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.end();
    }

    fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn max_reconnects(&self) -> u32 {
        self.max_reconnects
    }
}

pub struct MockTransport {
    behavior: Behavior,
    responder: Mutex<Responder>,
    pub opens: AtomicUsize,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            responder: Mutex::new(default_responder()),
            opens: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Answer calls with `responder` in sessions opened from now on.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        *self.responder.lock() = Arc::new(responder);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub fn last_session(&self) -> Arc<MockSession> {
        let sessions = self.sessions.lock();
        Arc::clone(sessions.last().expect("no session opened"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        _endpoint: &Endpoint,
        options: &TransportOptions,
    ) -> Result<TransportSession, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(MockSession {
            events: Mutex::new(Some(tx.clone())),
            handlers: Mutex::new(HashMap::new()),
            responder: Arc::clone(&self.responder.lock()),
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            max_reconnects: options.max_reconnects,
        });
        self.sessions.lock().push(Arc::clone(&session));

        match self.behavior {
            Behavior::OpenAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(TransportEvent::Open);
                });
            }
            Behavior::FailAll => {
                for reconnects in 0..options.max_reconnects.max(1) {
                    let _ = tx.send(TransportEvent::Error {
                        message: "connection refused".to_string(),
                        reconnects,
                    });
                }
                session.end();
            }
            Behavior::GiveUp => session.end(),
            Behavior::Manual => {}
        }

        Ok(TransportSession {
            session,
            events: rx,
        })
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::new("localhost", 4000).unwrap()
}

pub fn config() -> ClientConfig {
    ClientConfig::new("http://localhost:3000")
        .with_transport(TransportOptions::new().with_max_reconnects(3))
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
