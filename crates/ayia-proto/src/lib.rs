//! Ayia protocol types.
//!
//! This crate defines what travels between the client and the web-services
//! peer: JSON-RPC frames, raw change notifications, and the `/config`
//! document that locates the RPC endpoint.
//!
//! # Modules
//!
//! - [`jsonrpc`] - Request, response and event frames
//! - [`change`] - Raw change-stream events
//! - [`config`] - Remote configuration and endpoint resolution
//! - [`error`] - Protocol error types

pub mod change;
pub mod config;
pub mod error;
pub mod jsonrpc;

pub use error::Error;

// Re-export commonly used types at crate root
pub use change::{ChangeType, Namespace, RawChange, COLLECTION_CHANGE_EVENT};
pub use config::{Endpoint, RemoteConfig, WebServices};
pub use jsonrpc::{EventFrame, Incoming, Request, Response, RpcError};
