//! Entity trait and a property-bag entity

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Trait for types that can be written to a partitioned table.
///
/// The partition key decides which batch an operation can share; the row key
/// identifies the entity inside its partition. Everything else the type
/// serializes becomes the entity's properties.
///
/// # Example
///
/// ```rust,ignore
/// use table_batch_writer::TableEntity;
///
/// #[derive(Serialize)]
/// struct ChatMessage {
///     room: String,
///     id: String,
///     text: String,
/// }
///
/// impl TableEntity for ChatMessage {
///     fn partition_key(&self) -> &str { &self.room }
///     fn row_key(&self) -> &str { &self.id }
/// }
///
/// writer.insert(&message)?;
/// ```
pub trait TableEntity: Serialize + Send + Sync {
    /// The partition this entity lives in
    fn partition_key(&self) -> &str;

    /// The entity's key within its partition
    fn row_key(&self) -> &str;

    /// Optional: ETag for optimistic concurrency on delete/merge/replace.
    /// Defaults to unconditional.
    fn etag(&self) -> Option<&str> {
        None
    }
}

/// Entity made of a key pair and an arbitrary property bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntity {
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "RowKey")]
    pub row_key: String,
    #[serde(rename = "ETag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl DynamicEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            etag: None,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

impl TableEntity for DynamicEntity {
    fn partition_key(&self) -> &str {
        &self.partition_key
    }

    fn row_key(&self) -> &str {
        &self.row_key
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}
