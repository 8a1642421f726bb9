//! Client error types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use ayia_proto::RpcError;

/// Code given to authentication failures that did not come from the peer.
pub const AUTH_FAILURE_CODE: i64 = 401;

/// Client errors.
///
/// Errors are `Clone` so one connection failure can be handed to every
/// caller waiting on the same attempt.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Bus error.
    #[error("bus error: {0}")]
    Bus(#[from] ayia_bus::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ayia_proto::Error),

    /// Fetching or decoding the remote configuration failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The reconnect budget ran out before the first successful open.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A remote call returned an error.
    #[error("remote call failed ({code}): {message}")]
    RemoteCall {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The peer refused an event subscription.
    #[error("subscription to {event} refused: {status}")]
    SubscribeRefused { event: String, status: String },

    /// No socket is currently open.
    #[error("not connected")]
    NotConnected,

    /// The connection was closed by the client.
    #[error("connection closed")]
    Closed,
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::RemoteCall {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// Normalized failure of an authentication flow.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct AuthError {
    /// Remote error code, or [`AUTH_FAILURE_CODE`] for local failures.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl AuthError {
    /// Create an error.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Authentication was refused without a remote error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(AUTH_FAILURE_CODE, message)
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::RemoteCall { code, message, .. } => AuthError { code, message },
            other => AuthError::rejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_keeps_code() {
        let err: Error = RpcError::new(-32001, "bad password").into();
        let auth = AuthError::from(err);
        assert_eq!(auth, AuthError::new(-32001, "bad password"));
    }

    #[test]
    fn test_local_error_maps_to_401() {
        let auth = AuthError::from(Error::NotConnected);
        assert_eq!(auth.code, AUTH_FAILURE_CODE);
        assert_eq!(auth.message, "not connected");
        assert_eq!(auth.to_string(), "not connected (401)");
    }

    #[test]
    fn test_auth_error_serializes() {
        let json = serde_json::to_value(AuthError::rejected("denied")).unwrap();
        assert_eq!(json, serde_json::json!({"code": 401, "message": "denied"}));
    }
}
