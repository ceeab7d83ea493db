//! In-memory table store
//!
//! Reference implementation of `TableStore` with the semantics of a
//! partitioned table service: atomic single-partition batches, ETag
//! concurrency and per-kind existence rules. Used for local development and
//! as the collaborator in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{BatchResponse, OperationResult, TableStore};
use crate::batch::MAX_BATCH_SIZE;
use crate::error::StoreError;
use crate::operation::{OperationKind, PendingOperation};
use crate::retry::{OperationContext, RequestPolicy};

type Rows = BTreeMap<(String, String), StoredEntity>;

/// An entity as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntity {
    pub partition_key: String,
    pub row_key: String,
    pub etag: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

/// One observed `submit_batch` call.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub table: String,
    pub partition_key: String,
    pub client_request_id: Uuid,
    pub chunk_index: usize,
    pub attempt: u32,
    pub row_keys: Vec<String>,
    pub kinds: Vec<OperationKind>,
    pub committed: bool,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Rows>,
    next_etag: u64,
}

impl State {
    fn etag(&mut self) -> String {
        self.next_etag += 1;
        format!("W/\"{}\"", self.next_etag)
    }
}

/// In-memory table store.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    state: RwLock<State>,
    submissions: Mutex<Vec<Submission>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one entity.
    pub async fn get(&self, table: &str, partition_key: &str, row_key: &str) -> Option<StoredEntity> {
        let state = self.state.read().await;
        state
            .tables
            .get(table)?
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
    }

    /// All entities of one partition, ordered by row key.
    pub async fn partition(&self, table: &str, partition_key: &str) -> Vec<StoredEntity> {
        let state = self.state.read().await;
        state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|e| e.partition_key == partition_key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of entities in a table.
    pub async fn entity_count(&self, table: &str) -> usize {
        let state = self.state.read().await;
        state.tables.get(table).map(BTreeMap::len).unwrap_or(0)
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        self.state.read().await.tables.contains_key(table)
    }

    /// Every batch submission seen so far, committed or not.
    pub async fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().await.clone()
    }

    async fn record(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[PendingOperation],
        context: &OperationContext,
        committed: bool,
    ) {
        self.submissions.lock().await.push(Submission {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            client_request_id: context.client_request_id,
            chunk_index: context.chunk_index,
            attempt: context.attempt,
            row_keys: operations.iter().map(|op| op.row_key().to_string()).collect(),
            kinds: operations.iter().map(|op| op.kind).collect(),
            committed,
        });
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn ensure_table_exists(&self, table: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.tables.contains_key(table) {
            debug!(table = table, "Creating table");
            state.tables.insert(table.to_string(), Rows::new());
        }
        Ok(())
    }

    async fn submit_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[PendingOperation],
        _policy: &RequestPolicy,
        context: &OperationContext,
    ) -> Result<BatchResponse, StoreError> {
        let result = {
            let mut state = self.state.write().await;
            apply_batch(&mut state, table, partition_key, operations)
        };
        self.record(table, partition_key, operations, context, result.is_ok())
            .await;
        result
    }
}

/// Validate and apply a batch. Nothing is written unless every operation
/// succeeds.
fn apply_batch(
    state: &mut State,
    table: &str,
    partition_key: &str,
    operations: &[PendingOperation],
) -> Result<BatchResponse, StoreError> {
    if operations.is_empty() {
        return Err(StoreError::BadRequest("empty batch".into()));
    }
    if operations.len() > MAX_BATCH_SIZE {
        return Err(StoreError::BadRequest(format!(
            "batch of {} operations exceeds limit of {}",
            operations.len(),
            MAX_BATCH_SIZE
        )));
    }
    if let Some((i, op)) = operations
        .iter()
        .enumerate()
        .find(|(_, op)| op.partition_key() != partition_key)
    {
        return Err(StoreError::BadRequest(format!(
            "{}: partition key '{}' does not match batch partition '{}'",
            i,
            op.partition_key(),
            partition_key
        )));
    }
    if !state.tables.contains_key(table) {
        return Err(StoreError::TableNotFound(table.to_string()));
    }

    // row key -> staged value (None = deleted in this batch)
    let mut staged: HashMap<String, Option<StoredEntity>> = HashMap::new();
    let mut results = Vec::with_capacity(operations.len());
    let now = Utc::now();

    for (i, op) in operations.iter().enumerate() {
        let row_key = op.row_key();
        let current = match staged.get(row_key) {
            Some(value) => value.clone(),
            None => state
                .tables
                .get(table)
                .and_then(|rows| rows.get(&(partition_key.to_string(), row_key.to_string())))
                .cloned(),
        };
        let location = format!("{}: {}/{}", i, partition_key, row_key);

        let next = match (op.kind, current) {
            (OperationKind::Insert, Some(_)) => {
                return Err(StoreError::Conflict(location));
            }
            (OperationKind::Delete | OperationKind::Merge | OperationKind::Replace, None) => {
                return Err(StoreError::NotFound(location));
            }
            (OperationKind::Delete, Some(existing)) => {
                check_etag(op, &existing, &location)?;
                None
            }
            (OperationKind::Merge, Some(existing)) => {
                check_etag(op, &existing, &location)?;
                Some(merged(existing, op))
            }
            (OperationKind::InsertOrMerge, Some(existing)) => Some(merged(existing, op)),
            (OperationKind::Replace, Some(existing)) => {
                check_etag(op, &existing, &location)?;
                Some(fresh(op))
            }
            (OperationKind::InsertOrReplace, Some(_)) => Some(fresh(op)),
            (OperationKind::Insert | OperationKind::InsertOrMerge | OperationKind::InsertOrReplace, None) => {
                Some(fresh(op))
            }
        };

        let next = next.map(|mut entity| {
            entity.etag = state.etag();
            entity.timestamp = now;
            entity
        });
        results.push(OperationResult {
            row_key: row_key.to_string(),
            etag: next.as_ref().map(|e| e.etag.clone()),
        });
        staged.insert(row_key.to_string(), next);
    }

    let rows = state
        .tables
        .get_mut(table)
        .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
    for (row_key, value) in staged {
        let key = (partition_key.to_string(), row_key);
        match value {
            Some(entity) => {
                rows.insert(key, entity);
            }
            None => {
                rows.remove(&key);
            }
        }
    }

    Ok(BatchResponse { results })
}

fn check_etag(op: &PendingOperation, existing: &StoredEntity, location: &str) -> Result<(), StoreError> {
    match op.entity.etag.as_deref() {
        None | Some("*") => Ok(()),
        Some(etag) if etag == existing.etag => Ok(()),
        Some(etag) => Err(StoreError::PreconditionFailed(format!(
            "{}: etag {} does not match {}",
            location, etag, existing.etag
        ))),
    }
}

fn merged(mut existing: StoredEntity, op: &PendingOperation) -> StoredEntity {
    for (name, value) in &op.entity.properties {
        existing.properties.insert(name.clone(), value.clone());
    }
    existing
}

fn fresh(op: &PendingOperation) -> StoredEntity {
    StoredEntity {
        partition_key: op.entity.partition_key.clone(),
        row_key: op.entity.row_key.clone(),
        etag: String::new(),
        timestamp: Utc::now(),
        properties: op.entity.properties.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DynamicEntity;

    const TABLE: &str = "chatmessages";

    fn op(kind: OperationKind, entity: DynamicEntity) -> PendingOperation {
        PendingOperation::new(&entity, kind).unwrap()
    }

    async fn submit(
        store: &InMemoryTableStore,
        partition_key: &str,
        operations: &[PendingOperation],
    ) -> Result<BatchResponse, StoreError> {
        store
            .submit_batch(
                TABLE,
                partition_key,
                operations,
                &RequestPolicy::no_retry(),
                &OperationContext::new(partition_key, 0),
            )
            .await
    }

    async fn store_with_table() -> InMemoryTableStore {
        let store = InMemoryTableStore::new();
        store.ensure_table_exists(TABLE).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let store = InMemoryTableStore::new();
        assert!(!store.table_exists(TABLE).await);
        store.ensure_table_exists(TABLE).await.unwrap();
        store.ensure_table_exists(TABLE).await.unwrap();
        assert!(store.table_exists(TABLE).await);
    }

    #[tokio::test]
    async fn test_missing_table_rejected() {
        let store = InMemoryTableStore::new();
        let ops = vec![op(OperationKind::Insert, DynamicEntity::new("A", "1"))];
        let err = submit(&store, "A", &ops).await.unwrap_err();
        assert_eq!(err, StoreError::TableNotFound(TABLE.into()));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = store_with_table().await;
        submit(&store, "A", &[op(OperationKind::Insert, DynamicEntity::new("A", "2"))])
            .await
            .unwrap();

        let ops = vec![
            op(OperationKind::Insert, DynamicEntity::new("A", "1")),
            op(OperationKind::Insert, DynamicEntity::new("A", "2")),
        ];
        let err = submit(&store, "A", &ops).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(ref msg) if msg.starts_with("1:")));
        assert!(store.get(TABLE, "A", "1").await.is_none());
        assert_eq!(store.entity_count(TABLE).await, 1);
    }

    #[tokio::test]
    async fn test_mixed_partitions_rejected() {
        let store = store_with_table().await;
        let ops = vec![
            op(OperationKind::Insert, DynamicEntity::new("A", "1")),
            op(OperationKind::Insert, DynamicEntity::new("B", "1")),
        ];
        let err = submit(&store, "A", &ops).await.unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
        assert_eq!(store.entity_count(TABLE).await, 0);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let store = store_with_table().await;
        let ops: Vec<_> = (0..=MAX_BATCH_SIZE)
            .map(|i| op(OperationKind::Insert, DynamicEntity::new("A", i.to_string())))
            .collect();
        let err = submit(&store, "A", &ops).await.unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_merge_and_replace_semantics() {
        let store = store_with_table().await;
        let original = DynamicEntity::new("A", "1")
            .with_property("text", "hello")
            .with_property("likes", 1);
        submit(&store, "A", &[op(OperationKind::Insert, original)]).await.unwrap();

        let merge = DynamicEntity::new("A", "1").with_property("likes", 2);
        submit(&store, "A", &[op(OperationKind::Merge, merge)]).await.unwrap();
        let stored = store.get(TABLE, "A", "1").await.unwrap();
        assert_eq!(stored.properties["text"], "hello");
        assert_eq!(stored.properties["likes"], 2);

        let replace = DynamicEntity::new("A", "1").with_property("likes", 3);
        submit(&store, "A", &[op(OperationKind::Replace, replace)]).await.unwrap();
        let stored = store.get(TABLE, "A", "1").await.unwrap();
        assert!(stored.properties.get("text").is_none());
        assert_eq!(stored.properties["likes"], 3);
    }

    #[tokio::test]
    async fn test_missing_entity_rules() {
        let store = store_with_table().await;
        for kind in [OperationKind::Delete, OperationKind::Merge, OperationKind::Replace] {
            let err = submit(&store, "A", &[op(kind, DynamicEntity::new("A", "nope"))])
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)), "{:?}", kind);
        }

        for kind in [OperationKind::InsertOrMerge, OperationKind::InsertOrReplace] {
            submit(&store, "A", &[op(kind, DynamicEntity::new("A", kind.as_str()))])
                .await
                .unwrap();
        }
        assert_eq!(store.entity_count(TABLE).await, 2);
    }

    #[tokio::test]
    async fn test_etag_precondition() {
        let store = store_with_table().await;
        let response = submit(&store, "A", &[op(OperationKind::Insert, DynamicEntity::new("A", "1"))])
            .await
            .unwrap();
        let etag = response.results[0].etag.clone().unwrap();

        let stale = DynamicEntity::new("A", "1").with_etag("W/\"0\"");
        let err = submit(&store, "A", &[op(OperationKind::Replace, stale)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));

        let current = DynamicEntity::new("A", "1").with_etag(etag);
        let response = submit(&store, "A", &[op(OperationKind::Delete, current)])
            .await
            .unwrap();
        assert_eq!(response.results[0].etag, None);
        assert!(store.get(TABLE, "A", "1").await.is_none());
    }

    #[tokio::test]
    async fn test_operations_apply_in_order_within_batch() {
        let store = store_with_table().await;
        submit(&store, "A", &[op(OperationKind::Insert, DynamicEntity::new("A", "1"))])
            .await
            .unwrap();

        let ops = vec![
            op(OperationKind::Delete, DynamicEntity::new("A", "1")),
            op(OperationKind::Insert, DynamicEntity::new("A", "1").with_property("v", 2)),
        ];
        submit(&store, "A", &ops).await.unwrap();

        let stored = store.get(TABLE, "A", "1").await.unwrap();
        assert_eq!(stored.properties["v"], 2);

        let submissions = store.submissions().await;
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[1].kinds, vec![OperationKind::Delete, OperationKind::Insert]);
        assert!(submissions.iter().all(|s| s.committed));
    }
}
