//! Table store collaborator
//!
//! The writer never talks to a transport directly. It holds one shared
//! `TableStore` handle for its whole lifetime and submits each chunk as one
//! atomic batch through it.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::operation::PendingOperation;
use crate::retry::{OperationContext, RequestPolicy};

pub use memory::{InMemoryTableStore, StoredEntity, Submission};

/// Per-operation result of a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub row_key: String,
    /// ETag after the write; `None` for deletes
    pub etag: Option<String>,
}

/// Store acknowledgement of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<OperationResult>,
}

/// Backing table store with single-partition atomic batches.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create the table if it does not exist. Idempotent.
    async fn ensure_table_exists(&self, table: &str) -> Result<(), StoreError>;

    /// Apply `operations` atomically: either all of them or none.
    ///
    /// All operations share `partition_key`; there are at most
    /// `MAX_BATCH_SIZE` of them.
    async fn submit_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: &[PendingOperation],
        policy: &RequestPolicy,
        context: &OperationContext,
    ) -> Result<BatchResponse, StoreError>;
}
