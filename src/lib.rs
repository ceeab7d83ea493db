//! Table Batch Writer - buffered batch writes for partitioned table stores
//!
//! Producers queue entity operations (insert, delete, merge, replace and
//! the upsert variants) against a partitioned key-value table. On flush the
//! queued operations are grouped by partition key, split into batches of at
//! most 100 and submitted as atomic single-partition batch requests.
//!
//! # Architecture
//!
//! ```text
//! insert/delete/... ──► OperationBuffer ──flush──► group by partition
//!                                                      │
//!                                         chunk (≤ 100 ops per batch)
//!                                                      │
//!                                  TableStore::submit_batch (retry/backoff)
//!                                                      │
//!                                                 FlushReport
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use table_batch_writer::{DynamicEntity, InMemoryTableStore, TableStorageWriter, WriterConfig};
//!
//! let store = Arc::new(InMemoryTableStore::new());
//! let writer = TableStorageWriter::connect(store, WriterConfig::default()).await?;
//!
//! writer.insert(&DynamicEntity::new("lobby", "0001").with_property("text", "hi"))?;
//!
//! let report = writer.flush().await;
//! println!("{:?}: {} committed", report.status(), report.committed_operations());
//! ```

// Entity capability traits
pub mod traits;

// Queued operations
pub mod operation;

// Pending-operation buffer
pub mod buffer;

// Partition grouping and chunking
pub mod batch;

// Request policy and retries
pub mod retry;

// Store collaborator
pub mod store;

// Flush reports
pub mod report;

// The writer itself
pub mod writer;

// Configuration
pub mod config;

// Logging setup
pub mod telemetry;

// Error types
pub mod error;

pub use traits::{DynamicEntity, TableEntity};

pub use operation::{EntityRecord, OperationKind, PendingOperation};

pub use batch::{Chunk, PartitionGroup, MAX_BATCH_SIZE};

pub use retry::{OperationContext, RequestPolicy, RetryPolicy};

pub use store::{BatchResponse, InMemoryTableStore, OperationResult, TableStore};

pub use report::{ChunkReport, ChunkStatus, FlushReport, FlushStatus};

pub use writer::{TableStorageWriter, WriterStats};

pub use config::{WriterArgs, WriterConfig};

pub use error::{Result, StoreError, WriterError};
