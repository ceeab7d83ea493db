//! Queued table operations
//!
//! A `PendingOperation` is the type-erased form of a producer call: the
//! entity is serialized into an `EntityRecord` when it is queued, so the
//! buffer and the store never need to know the producer's entity type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WriterError};
use crate::traits::TableEntity;

/// Property names the store owns; they travel on the record, not in the bag.
const SYSTEM_PROPERTIES: [&str; 4] = ["PartitionKey", "RowKey", "ETag", "Timestamp"];

/// Kind of write to apply to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Create; fails if the entity exists
    Insert,
    /// Remove; fails if the entity is missing
    Delete,
    /// Create, or merge properties into the existing entity
    InsertOrMerge,
    /// Create, or overwrite the existing entity
    InsertOrReplace,
    /// Merge properties into an existing entity
    Merge,
    /// Overwrite an existing entity
    Replace,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
            OperationKind::InsertOrMerge => "insert_or_merge",
            OperationKind::InsertOrReplace => "insert_or_replace",
            OperationKind::Merge => "merge",
            OperationKind::Replace => "replace",
        }
    }
}

/// Serialized entity as seen by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub partition_key: String,
    pub row_key: String,
    pub etag: Option<String>,
    pub properties: Map<String, Value>,
}

impl EntityRecord {
    /// Serialize an entity, rejecting empty keys and non-object payloads.
    pub fn from_entity<E: TableEntity + ?Sized>(entity: &E) -> Result<Self> {
        let partition_key = entity.partition_key();
        let row_key = entity.row_key();

        if partition_key.is_empty() {
            return Err(WriterError::Validation(format!(
                "empty partition key (row key '{}')",
                row_key
            )));
        }
        if row_key.is_empty() {
            return Err(WriterError::Validation(format!(
                "empty row key (partition key '{}')",
                partition_key
            )));
        }

        let mut properties = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            other => {
                return Err(WriterError::Validation(format!(
                    "entity {}/{} must serialize to an object, got {}",
                    partition_key,
                    row_key,
                    json_type_name(&other)
                )))
            }
        };
        for name in SYSTEM_PROPERTIES {
            properties.remove(name);
        }

        Ok(Self {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            etag: entity.etag().map(str::to_string),
            properties,
        })
    }
}

/// An entity paired with the write to apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub entity: EntityRecord,
    pub kind: OperationKind,
}

impl PendingOperation {
    pub fn new<E: TableEntity + ?Sized>(entity: &E, kind: OperationKind) -> Result<Self> {
        Ok(Self {
            entity: EntityRecord::from_entity(entity)?,
            kind,
        })
    }

    pub fn partition_key(&self) -> &str {
        &self.entity.partition_key
    }

    pub fn row_key(&self) -> &str {
        &self.entity.row_key
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DynamicEntity;

    #[derive(Serialize)]
    struct Scalar(u32);

    impl TableEntity for Scalar {
        fn partition_key(&self) -> &str {
            "p"
        }
        fn row_key(&self) -> &str {
            "r"
        }
    }

    #[test]
    fn test_system_properties_stripped() {
        let entity = DynamicEntity::new("room-1", "msg-1")
            .with_etag("*")
            .with_property("text", "hi")
            .with_property("Timestamp", "2020-01-01T00:00:00Z");

        let op = PendingOperation::new(&entity, OperationKind::Merge).unwrap();
        assert_eq!(op.partition_key(), "room-1");
        assert_eq!(op.row_key(), "msg-1");
        assert_eq!(op.entity.etag.as_deref(), Some("*"));
        assert_eq!(op.entity.properties.len(), 1);
        assert_eq!(op.entity.properties["text"], "hi");
    }

    #[test]
    fn test_empty_keys_rejected() {
        let no_partition = DynamicEntity::new("", "msg-1");
        let err = PendingOperation::new(&no_partition, OperationKind::Insert).unwrap_err();
        assert!(matches!(err, WriterError::Validation(_)));

        let no_row = DynamicEntity::new("room-1", "");
        let err = PendingOperation::new(&no_row, OperationKind::Delete).unwrap_err();
        assert!(matches!(err, WriterError::Validation(_)));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = PendingOperation::new(&Scalar(7), OperationKind::Insert).unwrap_err();
        assert!(err.to_string().contains("number"));
    }
}
