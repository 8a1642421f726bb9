//! JSON-RPC 2.0 frames as exchanged with an rpc-websockets peer.
//!
//! Three kinds of frame travel over the socket:
//!
//! - requests and notifications sent by the client ([`Request`]),
//! - responses correlated by `id` ([`Response`]),
//! - server-pushed events (`{"notification": name, "params": ...}`, [`EventFrame`]).
//!
//! Inbound text is classified with [`Incoming::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// JSON-RPC version tag carried by every request and response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved method used to subscribe to a server-side event.
pub const METHOD_SUBSCRIBE: &str = "rpc.on";

/// Reserved method used to unsubscribe from a server-side event.
pub const METHOD_UNSUBSCRIBE: &str = "rpc.off";

/// Reserved method returning the names of all registered remote methods.
pub const METHOD_LIST_METHODS: &str = "__listMethods";

/// A client request. Without an `id` it is a notification and gets no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version, always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Remote method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Request {
    /// Create a call expecting a response.
    pub fn call(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Create a notification (fire-and-forget).
    pub fn notify(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Check whether this request expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error object without detail.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version, always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Identifier of the request being answered.
    pub id: u64,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Create a successful response.
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// A server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name.
    pub notification: String,
    /// Event arguments.
    #[serde(default)]
    pub params: Value,
}

impl EventFrame {
    /// Create an event frame carrying a single argument.
    pub fn new(event: impl Into<String>, params: Value) -> Self {
        Self {
            notification: event.into(),
            params,
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to an earlier call.
    Response {
        /// Identifier of the originating call.
        id: u64,
        /// Call outcome.
        outcome: Result<Value, RpcError>,
    },
    /// Server-pushed event.
    Notification {
        /// Event name.
        event: String,
        /// First event argument (array params are unwrapped).
        params: Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    notification: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl Incoming {
    /// Classify an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let frame: RawFrame = serde_json::from_str(text)?;

        if let Some(event) = frame.notification {
            let params = match frame.params {
                Some(Value::Array(items)) => items.into_iter().next().unwrap_or(Value::Null),
                Some(other) => other,
                None => Value::Null,
            };
            return Ok(Incoming::Notification { event, params });
        }

        let id = frame.id.as_ref().and_then(Value::as_u64).ok_or_else(|| {
            Error::InvalidMessage(format!(
                "frame carries neither a notification name nor a numeric id: {}",
                text
            ))
        })?;

        let outcome = match frame.error {
            Some(error) => Err(error),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };

        Ok(Incoming::Response { id, outcome })
    }
}
