//! Tagless (probabilistic) directory.
//!
//! No per-block tags are kept. Each set holds `buckets` sharer vectors; a block
//! is hashed by `hashes` independent functions onto buckets of its set, and a
//! sharer is recorded by setting its bit in every one of them. A lookup returns
//! the intersection of those buckets: every true sharer is present (no false
//! negatives) but other blocks hashing to the same buckets may add false
//! positives. Bits are only ever added; [`TaglessDirectory::rebuild`] is the
//! only way to shrink the sets.

use super::geometry::SetIndexer;
use super::snapshot::{BucketSnapshot, DirectorySnapshot, shape_mismatch};
use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::state::SharingVector;

/// SplitMix64 finalizer.
const fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Bloom-style sharer presence filter.
#[derive(Debug, Clone)]
pub struct TaglessDirectory {
    buckets: Vec<Vec<SharingVector>>,
    seeds: Vec<u64>,
    indexer: SetIndexer,
    block_bits: u32,
    width: usize,
}

impl TaglessDirectory {
    /// Creates an empty filter.
    ///
    /// # Arguments
    ///
    /// * `indexer` - Set-index function for this bank.
    /// * `buckets` - Buckets per set.
    /// * `hashes` - Independent hash functions per lookup.
    /// * `block_size` - Block size in bytes.
    /// * `width` - Sharer width.
    pub fn new(indexer: SetIndexer, buckets: usize, hashes: usize, block_size: u64, width: usize) -> Self {
        Self {
            buckets: (0..indexer.sets()).map(|_| vec![SharingVector::new(width); buckets]).collect(),
            seeds: (1..=hashes as u64).map(|i| mix64(i.wrapping_mul(0x9e37_79b9_7f4a_7c15))).collect(),
            indexer,
            block_bits: block_size.trailing_zeros(),
            width,
        }
    }

    /// Buckets per set.
    pub fn buckets_per_set(&self) -> usize {
        self.buckets.first().map_or(0, Vec::len)
    }

    /// Number of hash functions.
    pub fn hashes(&self) -> usize {
        self.seeds.len()
    }

    /// Returns the set and the distinct bucket indices `address` hashes to.
    pub fn bucket_indices(&self, address: MemoryAddress) -> (usize, Vec<usize>) {
        let set = self.indexer.index(address);
        let block = address.val() >> self.block_bits;
        let n = self.buckets_per_set() as u64;
        let mut idx: Vec<usize> = self.seeds.iter().map(|&seed| (mix64(block ^ seed) % n) as usize).collect();
        idx.sort_unstable();
        idx.dedup();
        (set, idx)
    }

    /// Returns a superset of the nodes holding `address`.
    pub fn lookup(&self, address: MemoryAddress) -> SharingVector {
        let (set, idx) = self.bucket_indices(address);
        let mut out = SharingVector::new(self.width);
        let mut buckets = idx.iter().map(|&b| &self.buckets[set][b]);
        if let Some(first) = buckets.next() {
            out |= first;
            for b in buckets {
                out &= b;
            }
        }
        out
    }

    /// Records `node` as a holder of `address`.
    pub fn insert(&mut self, address: MemoryAddress, node: NodeId) -> Result<()> {
        let (set, idx) = self.bucket_indices(address);
        for b in idx {
            self.buckets[set][b].add_sharer(node)?;
        }
        Ok(())
    }

    /// Clears every bucket.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().flatten().for_each(SharingVector::clear);
    }

    /// Rebuilds the filter from an exact list of holders.
    ///
    /// # Arguments
    ///
    /// * `entries` - `(address, sharers)` pairs describing the current holders.
    pub fn rebuild<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (MemoryAddress, &'a SharingVector)>,
    {
        self.clear();
        for (address, sharers) in entries {
            for node in sharers.iter() {
                self.insert(address, node)?;
            }
        }
        Ok(())
    }

    /// Returns true if every bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().flatten().all(SharingVector::is_empty)
    }

    /// Captures every non-empty bucket.
    pub fn save_state(&self) -> DirectorySnapshot {
        let entries = self
            .buckets
            .iter()
            .enumerate()
            .flat_map(|(set, row)| {
                row.iter().enumerate().filter(|(_, b)| !b.is_empty()).map(move |(bucket, b)| {
                    BucketSnapshot { set, bucket, sharers: b.words().to_vec() }
                })
            })
            .collect();
        DirectorySnapshot::Tagless {
            width: self.width,
            sets: self.buckets.len(),
            buckets: self.buckets_per_set(),
            hashes: self.hashes(),
            entries,
        }
    }

    /// Replaces the buckets with a snapshot of identical geometry.
    pub fn load_state(&mut self, bank: usize, snapshot: &DirectorySnapshot) -> Result<()> {
        let DirectorySnapshot::Tagless { width, sets, buckets, hashes, entries } = snapshot else {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("expected a tagless snapshot, found {}", snapshot.kind()),
            });
        };
        if *width != self.width {
            return Err(shape_mismatch(bank, "sharer width", self.width, *width));
        }
        if *sets != self.buckets.len() {
            return Err(shape_mismatch(bank, "set count", self.buckets.len(), *sets));
        }
        if *buckets != self.buckets_per_set() {
            return Err(shape_mismatch(bank, "bucket count", self.buckets_per_set(), *buckets));
        }
        if *hashes != self.hashes() {
            return Err(shape_mismatch(bank, "hash count", self.hashes(), *hashes));
        }
        let mut restored = vec![vec![SharingVector::new(self.width); self.buckets_per_set()]; self.buckets.len()];
        for record in entries {
            let Some(slot) = restored.get_mut(record.set).and_then(|row| row.get_mut(record.bucket)) else {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!("bucket {}/{} outside the filter", record.set, record.bucket),
                });
            };
            *slot = SharingVector::from_words(self.width, &record.sharers).map_err(|e| {
                DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!("bucket {}/{}: {e}", record.set, record.bucket),
                }
            })?;
        }
        self.buckets = restored;
        Ok(())
    }
}
