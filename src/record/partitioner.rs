//! Output channel selection per record.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Chooses the destination channel for one record.
///
/// Key-based partitioners must be stable: an identical partition key always
/// yields the identical channel index for the lifetime of one binding, so
/// per-key stateful consumers observe a single ordered stream per key.
pub trait Partitioner<R>: Send + Sync {
    /// Map one record to a channel index in `0..channel_count`.
    fn partition(&self, record: &R, channel_count: usize) -> usize;
}

/// Key-based partitioner over a caller-supplied key extractor.
pub struct HashPartitioner<F> {
    key: F,
}

impl<F> HashPartitioner<F> {
    /// Create a partitioner hashing the extracted key.
    pub fn new(key: F) -> Self {
        Self { key }
    }
}

impl<R, K, F> Partitioner<R> for HashPartitioner<F>
where
    K: Hash,
    F: Fn(&R) -> K + Send + Sync,
{
    fn partition(&self, record: &R, channel_count: usize) -> usize {
        // DefaultHasher::new() hashes with fixed keys, so the mapping is
        // stable for the lifetime of one binding.
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        (self.key)(record).hash(&mut hasher);
        (hasher.finish() % channel_count as u64) as usize
    }
}

/// Cycles through the channels regardless of record content.
#[derive(Debug, Default)]
pub struct RoundRobinPartitioner {
    next: AtomicUsize,
}

impl RoundRobinPartitioner {
    /// Create a partitioner starting at channel 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R> Partitioner<R> for RoundRobinPartitioner {
    fn partition(&self, _record: &R, channel_count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % channel_count
    }
}
