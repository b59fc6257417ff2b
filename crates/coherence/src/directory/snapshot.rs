//! Checkpoint records for directory storage.
//!
//! A bank's directory is saved as one [`BankSnapshot`]. Exact and region
//! snapshots list every occupied entry with its set and way so a restore
//! reproduces the storage layout exactly; tagless snapshots list every
//! non-empty bucket.

use serde::{Deserialize, Serialize};

use super::entry::DirectoryEntry;
use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::state::{CacheState, Modifiers, SharingVector};

/// One exact entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    /// Block address.
    pub tag: MemoryAddress,
    /// Coherence state.
    pub state: CacheState,
    /// Sharer bits packed into 64-bit words, lowest node first.
    pub sharers: Vec<u64>,
    /// Owning node.
    #[serde(default)]
    pub owner: Option<NodeId>,
    /// Locked modifier.
    #[serde(default)]
    pub locked: bool,
    /// Prefetched modifier.
    #[serde(default)]
    pub prefetched: bool,
    /// Migratory flag.
    #[serde(default)]
    pub migratory: bool,
    /// Last writer.
    #[serde(default)]
    pub last_writer: Option<NodeId>,
}

impl EntrySnapshot {
    /// Captures an entry. The protected bit is transient and not saved.
    pub fn capture(entry: &DirectoryEntry) -> Self {
        Self {
            tag: entry.tag,
            state: entry.state,
            sharers: entry.sharers.words().to_vec(),
            owner: entry.owner,
            locked: entry.modifiers.locked,
            prefetched: entry.modifiers.prefetched,
            migratory: entry.migratory,
            last_writer: entry.last_writer,
        }
    }

    /// Rebuilds the entry for a bank whose sharing vectors are `width` wide.
    pub fn restore(&self, bank: usize, width: usize) -> Result<DirectoryEntry> {
        let sharers = SharingVector::from_words(width, &self.sharers).map_err(|e| {
            DirectoryError::SnapshotMismatch { bank, reason: format!("entry {}: {e}", self.tag) }
        })?;
        let entry = DirectoryEntry {
            tag: self.tag,
            state: self.state,
            modifiers: Modifiers { protected: false, locked: self.locked, prefetched: self.prefetched },
            sharers,
            owner: self.owner,
            migratory: self.migratory,
            last_writer: self.last_writer,
        };
        if let Some(problem) = entry.invariant_violation() {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("entry {}: {problem}", self.tag),
            });
        }
        Ok(entry)
    }
}

/// One region entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    /// Region base address.
    pub tag: MemoryAddress,
    /// Region owner; meaningful only when `shared` is false.
    pub owner: Option<NodeId>,
    /// More than one node holds blocks of the region.
    pub shared: bool,
    /// Per-block entries, in block order.
    pub blocks: Vec<EntrySnapshot>,
}

/// An occupied slot of a set-associative structure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot<T> {
    /// Set index.
    pub set: usize,
    /// Way index.
    pub way: usize,
    /// Slot contents.
    pub entry: T,
}

/// One non-empty tagless bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Set index.
    pub set: usize,
    /// Bucket index within the set.
    pub bucket: usize,
    /// Bucket sharer bits.
    pub sharers: Vec<u64>,
}

/// Storage-specific snapshot body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectorySnapshot {
    /// Unbounded exact directory.
    Infinite {
        /// Sharer width.
        width: usize,
        /// Entries in address order.
        entries: Vec<EntrySnapshot>,
    },
    /// Set-associative exact directory.
    Std {
        /// Sharer width.
        width: usize,
        /// Sets per bank.
        sets: usize,
        /// Associativity.
        assoc: usize,
        /// Occupied slots.
        entries: Vec<SlotSnapshot<EntrySnapshot>>,
    },
    /// Region directory.
    Region {
        /// Sharer width.
        width: usize,
        /// Sets per bank.
        sets: usize,
        /// Associativity.
        assoc: usize,
        /// Blocks tracked by each region.
        blocks_per_region: usize,
        /// Occupied slots.
        entries: Vec<SlotSnapshot<RegionSnapshot>>,
    },
    /// Tagless directory.
    Tagless {
        /// Sharer width.
        width: usize,
        /// Sets per bank.
        sets: usize,
        /// Buckets per set.
        buckets: usize,
        /// Hash functions per lookup.
        hashes: usize,
        /// Non-empty buckets.
        entries: Vec<BucketSnapshot>,
    },
}

impl DirectorySnapshot {
    /// Returns the storage kind name used in the `kind` field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Infinite { .. } => "infinite",
            Self::Std { .. } => "std",
            Self::Region { .. } => "region",
            Self::Tagless { .. } => "tagless",
        }
    }
}

/// Checkpoint of one bank's directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    /// Bank index.
    pub bank: usize,
    /// Directory contents.
    #[serde(flatten)]
    pub directory: DirectorySnapshot,
}

/// Builds the error for a snapshot whose geometry differs from the bank's.
pub(crate) fn shape_mismatch(bank: usize, what: &str, expected: usize, found: usize) -> DirectoryError {
    DirectoryError::SnapshotMismatch {
        bank,
        reason: format!("{what} is {found} in the snapshot but {expected} in the bank"),
    }
}
