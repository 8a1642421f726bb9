//! Raw change notifications pushed by the backend's change stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Event name reserved for change notifications.
pub const COLLECTION_CHANGE_EVENT: &str = "collection.change";

/// Types of changes that can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// A new document was inserted.
    Insert,
    /// An existing document was updated.
    Update,
    /// A document was deleted.
    Delete,
}

impl ChangeType {
    /// Parse an `operationType` string.
    pub fn parse(operation: &str) -> Option<Self> {
        match operation {
            "insert" => Some(ChangeType::Insert),
            "update" => Some(ChangeType::Update),
            "delete" => Some(ChangeType::Delete),
            _ => None,
        }
    }

    /// The wire spelling of this change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "insert",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

/// Database and collection a change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    /// Collection name.
    #[serde(alias = "collection")]
    pub coll: String,
}

/// A change event exactly as delivered by the backend.
///
/// ```text
/// { documentKey: { _id },
///   operationType: insert | update | delete,
///   ns: { db, coll },
///   fullDocument?,          // insert
///   updateDescription? }    // update: { updatedFields, removedFields, ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    /// Key of the changed document.
    #[serde(default)]
    pub document_key: Value,
    /// Operation name; unrecognized names are kept verbatim.
    pub operation_type: String,
    /// Target namespace.
    pub ns: Namespace,
    /// Complete new document (inserts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,
    /// Update delta (updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_description: Option<Map<String, Value>>,
}

impl RawChange {
    /// Decode a change from an event payload.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// The recognized change type, if any.
    pub fn change_type(&self) -> Option<ChangeType> {
        ChangeType::parse(&self.operation_type)
    }

    /// Name of the collection that changed.
    pub fn collection(&self) -> &str {
        &self.ns.coll
    }

    /// Identifier of the changed document: `documentKey._id` when present,
    /// otherwise the whole key.
    pub fn document_id(&self) -> Value {
        match self.document_key.get("_id") {
            Some(id) => id.clone(),
            None => self.document_key.clone(),
        }
    }
}
