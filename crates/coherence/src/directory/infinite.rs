//! Unbounded exact directory.
//!
//! One entry per block ever requested, never replaced. Useful as a reference
//! model and whenever directory capacity should not perturb a run.

use std::collections::BTreeMap;

use super::entry::DirectoryEntry;
use super::snapshot::{DirectorySnapshot, EntrySnapshot, shape_mismatch};
use crate::common::{DirectoryError, MemoryAddress, Result};

/// Exact directory backed by an ordered map.
#[derive(Debug, Clone)]
pub struct InfiniteDirectory {
    entries: BTreeMap<MemoryAddress, DirectoryEntry>,
    width: usize,
}

impl InfiniteDirectory {
    /// Creates an empty directory for `width` sharers.
    pub const fn new(width: usize) -> Self {
        Self { entries: BTreeMap::new(), width }
    }

    /// Returns the entry for `address`.
    pub fn lookup(&self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        self.entries.get(&address)
    }

    /// Returns the entry for `address` for modification.
    pub fn entry_mut(&mut self, address: MemoryAddress) -> Option<&mut DirectoryEntry> {
        self.entries.get_mut(&address)
    }

    /// Installs an Invalid entry for `address` if none exists.
    pub fn allocate(&mut self, address: MemoryAddress) {
        let width = self.width;
        let _ = self.entries.entry(address).or_insert_with(|| DirectoryEntry::new(address, width));
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in address order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    /// Captures every entry.
    pub fn save_state(&self) -> DirectorySnapshot {
        DirectorySnapshot::Infinite {
            width: self.width,
            entries: self.entries.values().map(EntrySnapshot::capture).collect(),
        }
    }

    /// Replaces the contents with a snapshot.
    pub fn load_state(&mut self, bank: usize, snapshot: &DirectorySnapshot) -> Result<()> {
        let DirectorySnapshot::Infinite { width, entries } = snapshot else {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("expected an infinite snapshot, found {}", snapshot.kind()),
            });
        };
        if *width != self.width {
            return Err(shape_mismatch(bank, "sharer width", self.width, *width));
        }
        let mut restored = BTreeMap::new();
        for record in entries {
            let entry = record.restore(bank, self.width)?;
            if restored.insert(entry.tag, entry).is_some() {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!("entry {} appears twice", record.tag),
                });
            }
        }
        self.entries = restored;
        Ok(())
    }
}
