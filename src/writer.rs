//! Table Storage Writer - buffered, partition-batched table writes
//!
//! Producers queue entity operations from any thread without waiting on
//! the store. A flush drains everything queued so far, groups it by
//! partition key, cuts each partition into batches of at most 100
//! operations and submits every batch as one atomic request.
//!
//! ## Ordering
//!
//! Chunks of one partition are submitted strictly in order, one at a time.
//! Different partitions are independent and run concurrently, bounded by
//! `max_parallel_partitions`.
//!
//! ## Failures
//!
//! A failed chunk does not stop the flush. Its operations are dropped (they
//! were already drained) and the failure is returned in the `FlushReport`.
//! Retries only happen inside a single chunk submission.
//!
//! ## Concurrent flushes
//!
//! Flushes are serialized by an internal lock: a second `flush` waits for the
//! first to finish and then drains whatever arrived in the meantime.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(InMemoryTableStore::new());
//! let writer = TableStorageWriter::connect(store, WriterConfig::default()).await?;
//!
//! writer.insert(&message)?;
//! writer.delete(&old_message)?;
//!
//! let report = writer.flush().await;
//! if !report.is_success() {
//!     for chunk in report.failed_chunks() { /* ... */ }
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::batch::{group_by_partition, Chunk, PartitionGroup};
use crate::buffer::OperationBuffer;
use crate::config::WriterConfig;
use crate::error::Result;
use crate::operation::{OperationKind, PendingOperation};
use crate::report::{ChunkReport, ChunkStatus, FlushReport, FlushStatus};
use crate::retry::{retry_with_backoff, Attempted, OperationContext};
use crate::store::{BatchResponse, TableStore};
use crate::traits::TableEntity;

// =============================================================================
// Statistics
// =============================================================================

/// Lifetime statistics of a writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Operations currently queued
    pub outstanding: u64,
    pub ops_enqueued: u64,
    /// Enqueue calls rejected by validation
    pub ops_rejected: u64,
    pub ops_committed: u64,
    /// Operations dropped with a failed chunk
    pub ops_failed: u64,
    /// Flushes that drained at least one operation
    pub flushes: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    /// Store submissions, retries included
    pub submissions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ops_enqueued: AtomicU64,
    ops_rejected: AtomicU64,
    ops_committed: AtomicU64,
    ops_failed: AtomicU64,
    flushes: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    submissions: AtomicU64,
}

impl Counters {
    fn record_flush(&self, report: &FlushReport) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        for chunk in &report.chunks {
            let ops = chunk.operation_count() as u64;
            self.submissions
                .fetch_add(chunk.attempts as u64, Ordering::Relaxed);
            if chunk.is_committed() {
                self.batches_committed.fetch_add(1, Ordering::Relaxed);
                self.ops_committed.fetch_add(ops, Ordering::Relaxed);
            } else {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.ops_failed.fetch_add(ops, Ordering::Relaxed);
            }
        }
    }
}

// =============================================================================
// Table Storage Writer
// =============================================================================

/// Buffered batch writer over a `TableStore`.
///
/// The store handle is shared, reused for every batch, and lives as long as
/// the writer.
pub struct TableStorageWriter<S: TableStore + ?Sized> {
    store: Arc<S>,
    config: WriterConfig,
    buffer: OperationBuffer,
    /// Serializes flushes
    flush_lock: Mutex<()>,
    counters: Counters,
    /// Whether auto-flush is running
    auto_flush_running: AtomicBool,
    /// Bumped on every stop; a flush loop exits once it no longer matches
    auto_flush_generation: AtomicU64,
}

impl<S: TableStore + ?Sized> TableStorageWriter<S> {
    /// Create a writer without touching the store.
    pub fn new(store: Arc<S>, config: WriterConfig) -> Result<Self> {
        config.validate()?;

        info!(
            table = %config.table_name,
            batch_size = config.batch_size,
            max_parallel_partitions = config.max_parallel_partitions,
            max_retries = config.request_policy.retry.max_retries,
            "TableStorageWriter initialized"
        );

        Ok(Self {
            store,
            config,
            buffer: OperationBuffer::new(),
            flush_lock: Mutex::new(()),
            counters: Counters::default(),
            auto_flush_running: AtomicBool::new(false),
            auto_flush_generation: AtomicU64::new(0),
        })
    }

    /// Create a writer and make sure its table exists.
    pub async fn connect(store: Arc<S>, config: WriterConfig) -> Result<Self> {
        let writer = Self::new(store, config)?;
        writer
            .store
            .ensure_table_exists(&writer.config.table_name)
            .await?;
        Ok(writer)
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // =========================================================================
    // Queuing Operations
    // =========================================================================

    pub fn insert<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::Insert)
    }

    pub fn delete<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::Delete)
    }

    pub fn insert_or_merge<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::InsertOrMerge)
    }

    pub fn insert_or_replace<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::InsertOrReplace)
    }

    pub fn merge<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::Merge)
    }

    pub fn replace<E: TableEntity>(&self, entity: &E) -> Result<()> {
        self.enqueue(entity, OperationKind::Replace)
    }

    /// Queue an operation of any kind.
    ///
    /// Fails only when the entity itself is invalid (empty partition or row
    /// key, or it does not serialize to an object).
    pub fn enqueue<E: TableEntity>(&self, entity: &E, kind: OperationKind) -> Result<()> {
        match PendingOperation::new(entity, kind) {
            Ok(op) => {
                self.buffer.enqueue(op);
                self.counters.ops_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.ops_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(kind = kind.as_str(), error = %e, "Operation rejected");
                Err(e)
            }
        }
    }

    /// Operations waiting for the next flush.
    pub fn outstanding_operations(&self) -> usize {
        self.buffer.outstanding()
    }

    /// Drop all queued operations, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.buffer.drain_all().len();
        if dropped > 0 {
            warn!(dropped = dropped, "Write buffer cleared - pending operations dropped");
        }
        dropped
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Drain the buffer and submit everything as partition batches.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let start = Instant::now();

        let drained = self.buffer.drain_all();
        if drained.is_empty() {
            debug!("Flush skipped: nothing queued");
            return FlushReport::empty();
        }
        let drained_count = drained.len();

        let groups = group_by_partition(drained);
        let partitions = groups.len();

        let chunks: Vec<ChunkReport> = stream::iter(groups)
            .map(|group| self.flush_partition(group))
            .buffer_unordered(self.config.max_parallel_partitions)
            .flat_map(stream::iter)
            .collect()
            .await;

        let report = FlushReport {
            drained: drained_count,
            chunks,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        self.counters.record_flush(&report);

        let status = report.status();
        if status == FlushStatus::Succeeded {
            info!(
                drained = report.drained,
                partitions = partitions,
                batches = report.chunks.len(),
                duration_ms = report.duration_ms,
                "Flush completed"
            );
        } else {
            warn!(
                status = ?status,
                drained = report.drained,
                partitions = partitions,
                committed = report.committed_operations(),
                failed = report.failed_operations(),
                failed_batches = report.failed_chunks().count(),
                duration_ms = report.duration_ms,
                "Flush completed with failures"
            );
        }

        report
    }

    /// Submit one partition's chunks in order.
    async fn flush_partition(&self, group: PartitionGroup) -> Vec<ChunkReport> {
        let chunks = group.into_chunks(self.config.batch_size);
        let mut reports = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let attempted = self.execute_chunk(&chunk).await;
            let status = match attempted.result {
                Ok(_) => ChunkStatus::Committed,
                Err(error) => {
                    error!(
                        partition_key = %chunk.partition_key,
                        chunk = chunk.index,
                        operations = chunk.len(),
                        attempts = attempted.attempts,
                        error = %error,
                        "Batch failed, operations dropped"
                    );
                    ChunkStatus::Failed { error }
                }
            };
            reports.push(ChunkReport {
                row_keys: chunk.row_keys(),
                partition_key: chunk.partition_key,
                chunk_index: chunk.index,
                attempts: attempted.attempts,
                status,
            });
        }

        reports
    }

    /// Submit one chunk as a single atomic batch under the request policy.
    pub async fn execute_chunk(&self, chunk: &Chunk) -> Attempted<BatchResponse> {
        let context = OperationContext::new(chunk.partition_key.as_str(), chunk.index);
        let policy = &self.config.request_policy;
        let table = self.config.table_name.as_str();

        debug!(
            request_id = %context.client_request_id,
            partition_key = %chunk.partition_key,
            chunk = chunk.index,
            operations = chunk.len(),
            "Submitting batch"
        );

        retry_with_backoff(policy, &context, |attempt_context| {
            let store = &self.store;
            let partition_key = chunk.partition_key.as_str();
            let operations = chunk.operations.as_slice();
            async move {
                store
                    .submit_batch(table, partition_key, operations, policy, &attempt_context)
                    .await
            }
        })
        .await
    }

    // =========================================================================
    // Status and Statistics
    // =========================================================================

    pub fn stats(&self) -> WriterStats {
        let c = &self.counters;
        WriterStats {
            outstanding: self.outstanding_operations() as u64,
            ops_enqueued: c.ops_enqueued.load(Ordering::Relaxed),
            ops_rejected: c.ops_rejected.load(Ordering::Relaxed),
            ops_committed: c.ops_committed.load(Ordering::Relaxed),
            ops_failed: c.ops_failed.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            batches_committed: c.batches_committed.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            submissions: c.submissions.load(Ordering::Relaxed),
        }
    }

    pub fn is_auto_flush_running(&self) -> bool {
        self.auto_flush_running.load(Ordering::SeqCst)
    }

    /// Stop auto-flush background task.
    pub fn stop_auto_flush(&self) {
        self.auto_flush_generation.fetch_add(1, Ordering::SeqCst);
        self.auto_flush_running.store(false, Ordering::SeqCst);
    }

    fn auto_flush_current(&self, generation: u64) -> bool {
        self.is_auto_flush_running()
            && self.auto_flush_generation.load(Ordering::SeqCst) == generation
    }

    /// Stop auto-flush and flush whatever is still queued.
    pub async fn shutdown(&self) -> FlushReport {
        self.stop_auto_flush();
        let report = self.flush().await;
        info!(
            committed = report.committed_operations(),
            failed = report.failed_operations(),
            "TableStorageWriter shut down"
        );
        report
    }
}

// =============================================================================
// Auto-Flush Background Task
// =============================================================================

impl<S: TableStore + ?Sized + 'static> TableStorageWriter<S> {
    /// Start auto-flush background task.
    ///
    /// Spawns a task that flushes every `flush_interval_ms` while operations
    /// are queued. Must be called from within a tokio runtime.
    pub fn start_auto_flush(self: &Arc<Self>) {
        if self.auto_flush_running.swap(true, Ordering::SeqCst) {
            warn!("Auto-flush already running");
            return;
        }

        let generation = self.auto_flush_generation.load(Ordering::SeqCst);
        let writer = Arc::clone(self);
        let interval_ms = self.config.flush_interval_ms.max(1);

        tokio::spawn(async move {
            info!(
                interval_ms = interval_ms,
                generation = generation,
                "Auto-flush task started"
            );

            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;

                if !writer.auto_flush_current(generation) {
                    info!(generation = generation, "Auto-flush task stopping");
                    break;
                }

                if writer.outstanding_operations() > 0 {
                    let report = writer.flush().await;
                    debug!(
                        committed = report.committed_operations(),
                        failed = report.failed_operations(),
                        "Auto-flush completed"
                    );
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
