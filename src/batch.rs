//! Partition grouping and batch chunking
//!
//! A table store only accepts batches whose operations share one partition
//! key, and caps their length. A drained snapshot is therefore grouped by
//! partition (stable: each group keeps enqueue order) and every group is cut
//! into chunks of at most `batch_size` operations.

use std::collections::HashMap;

use crate::operation::PendingOperation;

/// Largest batch a table store accepts.
pub const MAX_BATCH_SIZE: usize = 100;

/// All drained operations for one partition, in enqueue order.
#[derive(Debug, Clone)]
pub struct PartitionGroup {
    pub partition_key: String,
    pub operations: Vec<PendingOperation>,
}

impl PartitionGroup {
    /// Split into ordered chunks of at most `batch_size` operations.
    ///
    /// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn into_chunks(self, batch_size: usize) -> Vec<Chunk> {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut chunks = Vec::with_capacity(self.operations.len().div_ceil(batch_size));
        let mut operations = self.operations.into_iter().peekable();
        let mut index = 0;

        while operations.peek().is_some() {
            chunks.push(Chunk {
                partition_key: self.partition_key.clone(),
                index,
                operations: operations.by_ref().take(batch_size).collect(),
            });
            index += 1;
        }

        chunks
    }
}

/// One batch request's worth of operations from a single partition.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub partition_key: String,
    /// Position of this chunk within its partition group
    pub index: usize,
    pub operations: Vec<PendingOperation>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn row_keys(&self) -> Vec<String> {
        self.operations
            .iter()
            .map(|op| op.row_key().to_string())
            .collect()
    }
}

/// Group operations by partition key.
///
/// Groups come out in order of each partition's first appearance; within a
/// group the original relative order is preserved.
pub fn group_by_partition(operations: Vec<PendingOperation>) -> Vec<PartitionGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<PartitionGroup> = Vec::new();

    for op in operations {
        match index.get(op.partition_key()) {
            Some(&slot) => groups[slot].operations.push(op),
            None => {
                let partition_key = op.partition_key().to_string();
                index.insert(partition_key.clone(), groups.len());
                groups.push(PartitionGroup {
                    partition_key,
                    operations: vec![op],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::traits::DynamicEntity;

    fn ops(partition: &str, count: usize) -> Vec<PendingOperation> {
        (0..count)
            .map(|i| {
                let entity = DynamicEntity::new(partition, format!("{:04}", i));
                PendingOperation::new(&entity, OperationKind::Insert).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_grouping_is_stable_per_partition() {
        let mut interleaved = Vec::new();
        let a = ops("A", 3);
        let b = ops("B", 3);
        for (x, y) in a.into_iter().zip(b) {
            interleaved.push(x);
            interleaved.push(y);
        }

        let groups = group_by_partition(interleaved);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].partition_key, "A");
        assert_eq!(groups[1].partition_key, "B");
        for group in &groups {
            let rows: Vec<_> = group.operations.iter().map(|o| o.row_key()).collect();
            assert_eq!(rows, vec!["0000", "0001", "0002"]);
            assert!(group
                .operations
                .iter()
                .all(|o| o.partition_key() == group.partition_key));
        }
    }

    #[test]
    fn test_chunk_sizes() {
        for (count, expected) in [
            (1, vec![1]),
            (99, vec![99]),
            (100, vec![100]),
            (101, vec![100, 1]),
            (150, vec![100, 50]),
            (300, vec![100, 100, 100]),
        ] {
            let group = group_by_partition(ops("A", count)).remove(0);
            let sizes: Vec<_> = group.into_chunks(MAX_BATCH_SIZE).iter().map(Chunk::len).collect();
            assert_eq!(sizes, expected, "partition of {}", count);
        }
    }

    #[test]
    fn test_chunks_preserve_order_and_index() {
        let group = group_by_partition(ops("A", 250)).remove(0);
        let chunks = group.into_chunks(MAX_BATCH_SIZE);

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.partition_key, "A");
            assert_eq!(chunk.operations[0].row_key(), format!("{:04}", i * 100));
        }
        assert_eq!(chunks[2].row_keys().last().map(String::as_str), Some("0249"));
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let group = group_by_partition(ops("A", 250)).remove(0);
        assert_eq!(group.clone().into_chunks(500).len(), 3);
        assert_eq!(group.into_chunks(0).len(), 250);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_by_partition(Vec::new()).is_empty());
    }
}
