//! Bus error types.

use thiserror::Error;

/// Bus errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Malformed call into a channel or subscription.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unsubscribe referenced a topic the channel never registered.
    #[error("channel {channel}: no such topic {topic}")]
    UnknownTopic { channel: String, topic: String },

    /// A subscriber callback failed. Only ever logged.
    #[error("subscriber {channel}.{topic} failed: {message}")]
    CallbackFailure {
        channel: String,
        topic: String,
        message: String,
    },
}
