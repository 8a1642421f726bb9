//! A single topic binding and its delivery.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::channel::{Channel, ChannelInner};
use crate::envelope::Envelope;
use crate::error::Error;

/// Error a subscriber callback may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback, called with the payload and the full envelope.
pub type Callback = Arc<dyn Fn(&Value, &Envelope) -> Result<(), CallbackError> + Send + Sync>;

/// Subscription descriptor: `{topic, callback}`.
#[derive(Clone, Default)]
pub struct SubscribeArgs {
    pub topic: Option<String>,
    pub callback: Option<Callback>,
}

impl SubscribeArgs {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the callback.
    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Envelope) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    pub(crate) fn resolve(self) -> Result<(String, Callback), Error> {
        let topic = match self.topic {
            Some(topic) if !topic.is_empty() => topic,
            _ => {
                return Err(Error::InvalidArgument(
                    "subscribe requires a topic string either as the first argument or as a property of the descriptor".to_string(),
                ))
            }
        };
        let callback = self.callback.ok_or_else(|| {
            Error::InvalidArgument(
                "subscribe requires a callback either as the second argument or as a property of the descriptor".to_string(),
            )
        })?;
        Ok((topic, callback))
    }
}

impl fmt::Debug for SubscribeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeArgs")
            .field("topic", &self.topic)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// A live (topic, callback) binding on one channel.
///
/// Cloning yields another handle to the same binding. Dropping every handle
/// does not cancel it; the channel keeps one until [`unsubscribe`](Self::unsubscribe).
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: u64,
    topic: String,
    channel_name: String,
    channel: Weak<ChannelInner>,
    callback: Callback,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        channel: &Arc<ChannelInner>,
        channel_name: &str,
        id: u64,
        topic: String,
        callback: Callback,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id,
                topic,
                channel_name: channel_name.to_string(),
                channel: Arc::downgrade(channel),
                callback,
                active: AtomicBool::new(true),
            }),
        }
    }

    /// Identifier unique within the owning channel.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Name of the owning channel.
    pub fn channel_name(&self) -> &str {
        &self.inner.channel_name
    }

    /// Whether the subscription still receives messages.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Dispatch one message.
    ///
    /// Returns `false` without doing anything if the subscription is
    /// inactive. Otherwise the callback is scheduled on the current tokio
    /// runtime (or run inline when there is none) and `true` is returned,
    /// whatever the callback later does.
    pub fn invoke(&self, envelope: &Arc<Envelope>) -> bool {
        if !self.is_active() {
            return false;
        }

        let subscription = self.clone();
        let envelope = Arc::clone(envelope);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Cancelled between publish and execution.
                    if subscription.is_active() {
                        subscription.run_callback(&envelope);
                    }
                });
            }
            Err(_) => subscription.run_callback(&envelope),
        }
        true
    }

    /// Cancel the subscription. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.is_active() {
            return;
        }
        match self.inner.channel.upgrade() {
            Some(inner) => {
                if let Err(e) = Channel::from_inner(inner).unsubscribe(self) {
                    tracing::warn!(
                        subscription_id = self.inner.id,
                        channel = %self.inner.channel_name,
                        topic = %self.inner.topic,
                        error = %e,
                        "unsubscribe failed"
                    );
                }
            }
            None => {
                self.deactivate();
            }
        }
    }

    /// Mark inactive. Returns whether it was active before.
    pub(crate) fn deactivate(&self) -> bool {
        self.inner.active.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn belongs_to(&self, channel: &Arc<ChannelInner>) -> bool {
        std::ptr::eq(Weak::as_ptr(&self.inner.channel), Arc::as_ptr(channel))
    }

    fn run_callback(&self, envelope: &Envelope) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.inner.callback)(&envelope.data, envelope)
        }));

        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let failure = Error::CallbackFailure {
            channel: self.inner.channel_name.clone(),
            topic: self.inner.topic.clone(),
            message,
        };
        let envelope_json = serde_json::to_string(envelope).unwrap_or_default();
        tracing::error!(
            subscription_id = self.inner.id,
            channel = %self.inner.channel_name,
            topic = %self.inner.topic,
            envelope = %envelope_json,
            error = %failure,
            "subscriber callback failed"
        );
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel_name)
            .field("topic", &self.inner.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
