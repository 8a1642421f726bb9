//! Messages delivered to subscribers and the shapes a publish call can take.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// The record handed to every subscriber of a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the channel the message was published on.
    pub channel: String,
    /// Topic within the channel.
    pub topic: String,
    /// Message payload.
    #[serde(default)]
    pub data: Value,
    /// Extra fields carried over from a publish descriptor.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope without extra fields.
    pub fn new(channel: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            topic: topic.into(),
            data,
            extra: Map::new(),
        }
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Subscribers that were dispatched to.
    pub activated: usize,
    /// Subscribers that were inactive at invocation time.
    pub skipped: usize,
}

/// Completion callback receiving the publish tally.
pub type DoneCallback = Box<dyn FnOnce(PublishReport) + Send + 'static>;

/// Value passed in the data position of a publish.
///
/// A callback in that position is taken as the completion callback and the
/// message is published with a null payload.
pub enum Payload {
    Data(Value),
    Done(DoneCallback),
}

impl Payload {
    /// Wrap a completion callback.
    pub fn done<F>(f: F) -> Self
    where
        F: FnOnce(PublishReport) + Send + 'static,
    {
        Payload::Done(Box::new(f))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Data(value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Payload::Done(_) => f.write_str("Done(..)"),
        }
    }
}

/// The call shapes accepted by [`Channel::publish_with`](crate::Channel::publish_with).
pub enum Publish {
    /// `(topic, data, done)`.
    Topic {
        topic: String,
        data: Payload,
        done: Option<DoneCallback>,
    },
    /// A pre-built `{topic, data, ..}` object merged into the envelope.
    Envelope {
        descriptor: Value,
        done: Option<DoneCallback>,
    },
}

impl Publish {
    /// Publish `data` under `topic`.
    pub fn topic(topic: impl Into<String>, data: impl Into<Payload>) -> Self {
        Publish::Topic {
            topic: topic.into(),
            data: data.into(),
            done: None,
        }
    }

    /// Publish a descriptor object.
    pub fn envelope(descriptor: Value) -> Self {
        Publish::Envelope {
            descriptor,
            done: None,
        }
    }

    /// Attach a completion callback.
    pub fn with_done<F>(mut self, f: F) -> Self
    where
        F: FnOnce(PublishReport) + Send + 'static,
    {
        match &mut self {
            Publish::Topic { done, .. } | Publish::Envelope { done, .. } => {
                *done = Some(Box::new(f));
            }
        }
        self
    }

    /// Normalize into topic, payload, extra envelope fields and callback.
    pub(crate) fn resolve(self) -> Result<ResolvedPublish, Error> {
        match self {
            Publish::Topic { topic, data, done } => {
                let (data, done) = match data {
                    Payload::Data(value) => (value, done),
                    Payload::Done(callback) => (Value::Null, Some(callback)),
                };
                Ok(ResolvedPublish {
                    topic,
                    data,
                    extra: Map::new(),
                    done,
                })
            }
            Publish::Envelope { descriptor, done } => {
                let mut fields = match descriptor {
                    Value::Object(fields) => fields,
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "publish descriptor must be an object, got {}",
                            other
                        )))
                    }
                };
                let topic = match fields.remove("topic") {
                    Some(Value::String(topic)) => topic,
                    _ => {
                        return Err(Error::InvalidArgument(
                            "publish requires a topic string either as the first argument or as a property of the descriptor".to_string(),
                        ))
                    }
                };
                let data = fields.remove("data").unwrap_or(Value::Null);
                fields.remove("channel");
                Ok(ResolvedPublish {
                    topic,
                    data,
                    extra: fields,
                    done,
                })
            }
        }
    }
}

impl fmt::Debug for Publish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Publish::Topic { topic, data, done } => f
                .debug_struct("Topic")
                .field("topic", topic)
                .field("data", data)
                .field("done", &done.is_some())
                .finish(),
            Publish::Envelope { descriptor, done } => f
                .debug_struct("Envelope")
                .field("descriptor", descriptor)
                .field("done", &done.is_some())
                .finish(),
        }
    }
}

pub(crate) struct ResolvedPublish {
    pub topic: String,
    pub data: Value,
    pub extra: Map<String, Value>,
    pub done: Option<DoneCallback>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_position_callback_becomes_done() {
        let resolved = Publish::topic("users.insert", Payload::done(|_| {}))
            .resolve()
            .unwrap();
        assert_eq!(resolved.topic, "users.insert");
        assert_eq!(resolved.data, Value::Null);
        assert!(resolved.done.is_some());
    }

    #[test]
    fn test_descriptor_fields() {
        let resolved = Publish::envelope(json!({
            "topic": "users.update",
            "data": {"age": 31},
            "channel": "ignored",
            "origin": "local",
        }))
        .resolve()
        .unwrap();

        assert_eq!(resolved.topic, "users.update");
        assert_eq!(resolved.data, json!({"age": 31}));
        assert!(resolved.extra.get("channel").is_none());
        assert_eq!(resolved.extra.get("origin"), Some(&json!("local")));
        assert!(resolved.done.is_none());
    }

    #[test]
    fn test_descriptor_without_topic() {
        let err = Publish::envelope(json!({"data": 1})).resolve().err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = Publish::envelope(json!({"topic": 7})).resolve().err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = Publish::envelope(json!("users.insert"))
            .resolve()
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let mut envelope = Envelope::new("/", "t", json!([1, 2]));
        envelope.extra.insert("origin".to_string(), json!("local"));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"channel": "/", "topic": "t", "data": [1, 2], "origin": "local"})
        );
    }
}
