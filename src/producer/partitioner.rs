use rand::{self, Rng};

use protocol::PartitionId;

/// Chooses which partition of a topic a message lands on.
pub trait Partitioner {
    /// `None` when no choice can be made (e.g. the partition list is empty);
    /// the message is then queued for retry after a heal.
    fn partition(&self, key: Option<&[u8]>, partitions: &[PartitionId]) -> Option<PartitionId>;
}

/// Uniform random choice over the topic's partitions.
#[derive(Clone, Debug, Default)]
pub struct RandomPartitioner;

impl Partitioner for RandomPartitioner {
    fn partition(&self, _key: Option<&[u8]>, partitions: &[PartitionId]) -> Option<PartitionId> {
        rand::thread_rng().choose(partitions).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_stays_in_range() {
        let partitions = [1, 3, 8];

        for _ in 0..100 {
            let choice = RandomPartitioner.partition(None, &partitions).unwrap();
            assert!(partitions.contains(&choice));
        }
    }

    #[test]
    fn test_random_empty() {
        assert_eq!(RandomPartitioner.partition(None, &[]), None);
    }
}
