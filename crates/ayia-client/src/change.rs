//! Translation of raw change notifications into bus messages.
//!
//! A raw change on collection `users` with operation `insert` becomes a
//! publish of topic `users.insert` on the change channel:
//!
//! ```text
//! <coll>.delete   { documentKey }
//! <coll>.insert   { documentKey, fullDocument }
//! <coll>.update   { documentKey, updatedFields, removedFields, .. }
//! ```

use serde_json::{Map, Value};

use ayia_bus::{Channel, PublishReport};
use ayia_proto::{ChangeType, RawChange};

use crate::error::Error;

/// Republishes raw change events on a bus channel.
#[derive(Debug, Clone)]
pub struct ChangeTranslator {
    channel: Channel,
}

impl ChangeTranslator {
    /// Publish on `channel`.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Target channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Topic and payload for one raw change.
    pub fn translate(change: &RawChange) -> (String, Value) {
        let topic = format!("{}.{}", change.collection(), change.operation_type);

        let mut payload = Map::new();
        payload.insert("documentKey".to_string(), change.document_id());

        match change.change_type() {
            Some(ChangeType::Insert) => {
                payload.insert(
                    "fullDocument".to_string(),
                    change.full_document.clone().unwrap_or(Value::Null),
                );
            }
            Some(ChangeType::Update) => {
                if let Some(description) = &change.update_description {
                    for (key, value) in description {
                        payload.insert(key.clone(), value.clone());
                    }
                }
            }
            Some(ChangeType::Delete) | None => {}
        }

        (topic, Value::Object(payload))
    }

    /// Translate and publish one raw change.
    pub fn publish(&self, change: &RawChange) -> Result<PublishReport, Error> {
        let (topic, payload) = Self::translate(change);
        tracing::debug!(channel = %self.channel.name(), topic = %topic, "change received");
        Ok(self.channel.publish(topic, payload)?)
    }

    /// Handle an undecoded change event. Malformed events are logged and
    /// dropped.
    pub fn handle(&self, event: Value) {
        let change = match RawChange::from_value(event) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed change event");
                return;
            }
        };
        if let Err(e) = self.publish(&change) {
            tracing::warn!(error = %e, "failed to publish change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayia_bus::Envelope;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn raw(value: Value) -> RawChange {
        RawChange::from_value(value).unwrap()
    }

    #[test]
    fn test_translate_insert() {
        let (topic, payload) = ChangeTranslator::translate(&raw(json!({
            "operationType": "insert",
            "ns": {"db": "ayia", "coll": "users"},
            "documentKey": {"_id": "u1"},
            "fullDocument": {"name": "Ann"},
        })));

        assert_eq!(topic, "users.insert");
        assert_eq!(payload, json!({"documentKey": "u1", "fullDocument": {"name": "Ann"}}));
    }

    #[test]
    fn test_translate_update_merges_description() {
        let (topic, payload) = ChangeTranslator::translate(&raw(json!({
            "operationType": "update",
            "ns": {"coll": "users"},
            "documentKey": {"_id": "u1"},
            "updateDescription": {
                "updatedFields": {"age": 31},
                "removedFields": [],
                "truncatedArrays": [],
            },
        })));

        assert_eq!(topic, "users.update");
        assert_eq!(
            payload,
            json!({
                "documentKey": "u1",
                "updatedFields": {"age": 31},
                "removedFields": [],
                "truncatedArrays": [],
            })
        );
    }

    #[test]
    fn test_translate_delete_and_unknown() {
        let (topic, payload) = ChangeTranslator::translate(&raw(json!({
            "operationType": "delete",
            "ns": {"coll": "logs"},
            "documentKey": {"_id": 4},
            "fullDocument": {"ignored": true},
        })));
        assert_eq!(topic, "logs.delete");
        assert_eq!(payload, json!({"documentKey": 4}));

        let (topic, payload) = ChangeTranslator::translate(&raw(json!({
            "operationType": "drop",
            "ns": {"coll": "logs"},
            "documentKey": {"_id": 4},
            "updateDescription": {"updatedFields": {}},
        })));
        assert_eq!(topic, "logs.drop");
        assert_eq!(payload, json!({"documentKey": 4}));
    }

    #[tokio::test]
    async fn test_handle_publishes_on_channel() {
        let channel = Channel::new("collection.change");
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        channel
            .subscribe("runs.insert", move |_, envelope| {
                let _ = tx.send(envelope.clone());
                Ok(())
            })
            .unwrap();

        let translator = ChangeTranslator::new(channel);
        translator.handle(json!({"bogus": true}));
        translator.handle(json!({
            "operationType": "insert",
            "ns": {"coll": "runs"},
            "documentKey": {"_id": "r1"},
            "fullDocument": {"state": "queued"},
        }));

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.channel, "collection.change");
        assert_eq!(envelope.topic, "runs.insert");
        assert_eq!(envelope.data["fullDocument"], json!({"state": "queued"}));
    }
}
