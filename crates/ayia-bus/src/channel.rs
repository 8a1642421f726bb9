//! Named topic namespace: subscription registry and delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::envelope::{Envelope, Publish, PublishReport};
use crate::error::Error;
use crate::subscription::{CallbackError, SubscribeArgs, Subscription};

pub(crate) struct ChannelInner {
    name: String,
    /// Subscriptions keyed by topic, then by subscription ID.
    /// Topic entries are kept once created, even when empty.
    topics: RwLock<HashMap<String, HashMap<u64, Subscription>>>,
    next_subscription_id: AtomicU64,
}

/// A named, independent namespace of topics.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a standalone channel. Use [`Bus::channel`](crate::Bus::channel)
    /// for the shared, cached ones.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                topics: RwLock::new(HashMap::new()),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribe `callback` to `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Result<Subscription, Error>
    where
        F: Fn(&Value, &Envelope) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe_with(SubscribeArgs::new().topic(topic).callback(callback))
    }

    /// Subscribe from a `{topic, callback}` descriptor.
    pub fn subscribe_with(&self, args: SubscribeArgs) -> Result<Subscription, Error> {
        let (topic, callback) = args.resolve()?;
        let subscription_id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Subscription::new(
            &self.inner,
            &self.inner.name,
            subscription_id,
            topic.clone(),
            callback,
        );

        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .insert(subscription_id, subscription.clone());

        tracing::debug!(
            subscription_id,
            channel = %self.inner.name,
            topic = %topic,
            "subscription created"
        );

        Ok(subscription)
    }

    /// Remove a subscription created by this channel and mark it inactive.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<(), Error> {
        if !subscription.belongs_to(&self.inner) {
            return Err(Error::InvalidArgument(format!(
                "subscription {} belongs to channel {}, not {}",
                subscription.id(),
                subscription.channel_name(),
                self.inner.name
            )));
        }

        subscription.deactivate();
        let removed = {
            let mut topics = self.inner.topics.write();
            let subscribers = topics.get_mut(subscription.topic()).ok_or_else(|| {
                Error::UnknownTopic {
                    channel: self.inner.name.clone(),
                    topic: subscription.topic().to_string(),
                }
            })?;
            subscribers.remove(&subscription.id()).is_some()
        };

        if removed {
            tracing::debug!(
                subscription_id = subscription.id(),
                channel = %self.inner.name,
                topic = %subscription.topic(),
                "subscription removed"
            );
        }

        Ok(())
    }

    /// Publish `data` under `topic`.
    pub fn publish(&self, topic: impl Into<String>, data: Value) -> Result<PublishReport, Error> {
        self.publish_with(Publish::topic(topic, data))
    }

    /// Publish any accepted call shape.
    ///
    /// Publishing to a topic nobody subscribed to is a no-op reported as
    /// `{activated: 0, skipped: 0}`.
    pub fn publish_with(&self, publish: Publish) -> Result<PublishReport, Error> {
        let resolved = publish.resolve()?;

        let subscribers: Vec<Subscription> = {
            let topics = self.inner.topics.read();
            match topics.get(&resolved.topic) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => Vec::new(),
            }
        };

        let envelope = Arc::new(Envelope {
            channel: self.inner.name.clone(),
            topic: resolved.topic,
            data: resolved.data,
            extra: resolved.extra,
        });

        let mut report = PublishReport::default();
        for subscription in &subscribers {
            if subscription.invoke(&envelope) {
                report.activated += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::trace!(
            channel = %self.inner.name,
            topic = %envelope.topic,
            activated = report.activated,
            skipped = report.skipped,
            "published"
        );

        if let Some(done) = resolved.done {
            done(report);
        }

        Ok(report)
    }

    /// Topics registered so far, including ones without subscribers.
    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.read().keys().cloned().collect()
    }

    /// Number of subscriptions registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Whether both handles refer to the same channel.
    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("topics", &self.inner.topics.read().len())
            .finish()
    }
}
