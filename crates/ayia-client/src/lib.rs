//! Ayia real-time client.
//!
//! Keeps one authenticated JSON-RPC connection alive per process and turns
//! the backend's change stream into [`ayia_bus`] messages.
//!
//! # Example
//!
//! ```no_run
//! use ayia_bus::Bus;
//! use ayia_client::{ClientConfig, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(ClientConfig::new("http://localhost:3000"));
//!
//!     Bus::global()
//!         .channel("collection.change")
//!         .subscribe("users.insert", |data, _| {
//!             println!("new user: {}", data);
//!             Ok(())
//!         })?;
//!
//!     let conn = manager.get_connection().await?;
//!     manager.subscribe_changes(&conn).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`manager`] - Shared connection lifecycle
//! - [`connection`] - Connection handle and remote calls
//! - [`change`] - Change notification translation
//! - [`auth`] - User authentication flows
//! - [`transport`] - Socket seam and the WebSocket transport
//! - [`endpoint`] - Endpoint resolution via `/config`

pub mod auth;
pub mod change;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod manager;
pub mod transport;

pub use auth::password_hash;
pub use change::ChangeTranslator;
pub use config::{ClientConfig, TransportOptions};
pub use connection::{Connection, ConnectionState};
pub use endpoint::{EndpointResolver, HttpConfigResolver, StaticResolver};
pub use error::{AuthError, Error};
pub use identity::{AuthUser, IdentityStore};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use transport::{EventHandler, RpcSession, Transport, TransportEvent, TransportSession, WsTransport};
