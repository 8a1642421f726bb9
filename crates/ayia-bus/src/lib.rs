//! Ayia in-process message bus.
//!
//! A [`Bus`] holds named [`Channel`]s; each channel maps topic names to
//! [`Subscription`]s. Publishing dispatches every active subscriber as its
//! own tokio task, so slow or failing subscribers never hold up the
//! publisher or each other.
//!
//! # Example
//!
//! ```no_run
//! use ayia_bus::Bus;
//! use serde_json::json;
//!
//! let channel = Bus::global().channel("collection.change");
//! let subscription = channel
//!     .subscribe("users.insert", |data, envelope| {
//!         println!("{} {}", envelope.topic, data);
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! channel.publish("users.insert", json!({"documentKey": "u1"})).unwrap();
//! subscription.unsubscribe();
//! ```

pub mod bus;
pub mod channel;
pub mod envelope;
pub mod error;
pub mod subscription;

pub use bus::{Bus, DEFAULT_CHANNEL};
pub use channel::Channel;
pub use envelope::{DoneCallback, Envelope, Payload, Publish, PublishReport};
pub use error::Error;
pub use subscription::{Callback, CallbackError, SubscribeArgs, Subscription};
