//! Flush reports
//!
//! A flush never stops at the first failed chunk. Each chunk's outcome is
//! recorded here so callers can tell a clean flush from a partial or total
//! failure, and see which entities were affected.

use serde::Serialize;

use crate::error::{Result, StoreError, WriterError};

/// Outcome of one chunk submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Committed,
    /// Operations were dropped; none of them are assumed applied
    Failed { error: StoreError },
}

/// Report for a single chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub partition_key: String,
    /// Position of the chunk within its partition
    pub chunk_index: usize,
    /// Row keys of the chunk's operations, in submission order
    pub row_keys: Vec<String>,
    /// Store submissions made for this chunk, retries included
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl ChunkReport {
    pub fn is_committed(&self) -> bool {
        matches!(self.status, ChunkStatus::Committed)
    }

    pub fn error(&self) -> Option<&StoreError> {
        match &self.status {
            ChunkStatus::Committed => None,
            ChunkStatus::Failed { error } => Some(error),
        }
    }

    pub fn operation_count(&self) -> usize {
        self.row_keys.len()
    }
}

/// Overall classification of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlushStatus {
    /// Nothing was queued; no store calls were made
    Empty,
    Succeeded,
    Failed,
    PartiallySucceeded,
}

/// Result of a flush.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    /// Operations taken out of the buffer
    pub drained: usize,
    /// Per-chunk outcomes, grouped by partition, chunks in order
    pub chunks: Vec<ChunkReport>,
    /// Duration in milliseconds
    pub duration_ms: f64,
}

impl FlushReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn status(&self) -> FlushStatus {
        let failed = self.failed_chunks().count();
        match (self.chunks.len(), failed) {
            (0, _) => FlushStatus::Empty,
            (_, 0) => FlushStatus::Succeeded,
            (total, failed) if failed == total => FlushStatus::Failed,
            _ => FlushStatus::PartiallySucceeded,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status(), FlushStatus::Empty | FlushStatus::Succeeded)
    }

    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| !c.is_committed())
    }

    pub fn committed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| c.is_committed())
    }

    pub fn committed_operations(&self) -> usize {
        self.committed_chunks().map(ChunkReport::operation_count).sum()
    }

    pub fn failed_operations(&self) -> usize {
        self.failed_chunks().map(ChunkReport::operation_count).sum()
    }

    /// Total store submissions, retries included.
    pub fn submissions(&self) -> u32 {
        self.chunks.iter().map(|c| c.attempts).sum()
    }

    /// Chunks reported for one partition, in chunk order.
    pub fn partition(&self, partition_key: &str) -> Vec<&ChunkReport> {
        let mut chunks: Vec<_> = self
            .chunks
            .iter()
            .filter(|c| c.partition_key == partition_key)
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    /// Turn a failed or partial flush into an error, keeping clean flushes.
    pub fn into_result(self) -> Result<FlushReport> {
        let failed_chunks = self.failed_chunks().count();
        match self.status() {
            FlushStatus::Empty | FlushStatus::Succeeded => Ok(self),
            FlushStatus::Failed => Err(WriterError::FlushFailed { failed_chunks }),
            FlushStatus::PartiallySucceeded => Err(WriterError::PartialFlush {
                failed_chunks,
                total_chunks: self.chunks.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(partition: &str, index: usize, rows: usize, status: ChunkStatus) -> ChunkReport {
        ChunkReport {
            partition_key: partition.to_string(),
            chunk_index: index,
            row_keys: (0..rows).map(|i| i.to_string()).collect(),
            attempts: 1,
            status,
        }
    }

    fn failed() -> ChunkStatus {
        ChunkStatus::Failed {
            error: StoreError::Conflict("A/1".into()),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(FlushReport::empty().status(), FlushStatus::Empty);

        let mut report = FlushReport {
            drained: 150,
            chunks: vec![
                chunk("A", 0, 100, ChunkStatus::Committed),
                chunk("A", 1, 50, ChunkStatus::Committed),
            ],
            duration_ms: 1.0,
        };
        assert_eq!(report.status(), FlushStatus::Succeeded);
        assert!(report.is_success());

        report.chunks[1].status = failed();
        assert_eq!(report.status(), FlushStatus::PartiallySucceeded);
        assert_eq!(report.committed_operations(), 100);
        assert_eq!(report.failed_operations(), 50);

        report.chunks[0].status = failed();
        assert_eq!(report.status(), FlushStatus::Failed);
        assert!(!report.is_success());
    }

    #[test]
    fn test_into_result() {
        let partial = FlushReport {
            drained: 2,
            chunks: vec![
                chunk("A", 0, 1, ChunkStatus::Committed),
                chunk("B", 0, 1, failed()),
            ],
            duration_ms: 0.5,
        };
        match partial.into_result() {
            Err(WriterError::PartialFlush {
                failed_chunks,
                total_chunks,
            }) => {
                assert_eq!(failed_chunks, 1);
                assert_eq!(total_chunks, 2);
            }
            other => panic!("expected partial flush, got {:?}", other),
        }

        assert!(FlushReport::empty().into_result().is_ok());
    }

    #[test]
    fn test_partition_view_sorted() {
        let report = FlushReport {
            drained: 3,
            chunks: vec![
                chunk("A", 1, 1, ChunkStatus::Committed),
                chunk("B", 0, 1, ChunkStatus::Committed),
                chunk("A", 0, 1, ChunkStatus::Committed),
            ],
            duration_ms: 0.0,
        };
        let a: Vec<_> = report.partition("A").iter().map(|c| c.chunk_index).collect();
        assert_eq!(a, vec![0, 1]);
    }

    #[test]
    fn test_report_serializes() {
        let report = FlushReport {
            drained: 1,
            chunks: vec![chunk("B", 0, 1, failed())],
            duration_ms: 0.0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["chunks"][0]["status"]["status"], "failed");
        assert_eq!(json["chunks"][0]["status"]["error"]["kind"], "Conflict");
    }
}
