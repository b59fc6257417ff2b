//! Set-associative exact directory.
//!
//! Each bank holds `sets x assoc` entries. A request to an absent block first
//! takes an empty or idle way; otherwise the replacement policy picks an
//! unprotected victim, whose sharers the caller must back-invalidate through
//! the Evict Buffer. If every way is protected the set is full and the request
//! must wait for a transaction in the set to finish.

use tracing::debug;

use super::Allocation;
use super::entry::DirectoryEntry;
use super::geometry::SetIndexer;
use super::replacement::{VictimPolicy, WayInfo};
use super::snapshot::{DirectorySnapshot, EntrySnapshot, SlotSnapshot, shape_mismatch};
use crate::common::{DirectoryError, MemoryAddress, Result};

/// Set-associative exact directory.
#[derive(Debug)]
pub struct StdDirectory {
    sets: Vec<Vec<Option<DirectoryEntry>>>,
    indexer: SetIndexer,
    assoc: usize,
    width: usize,
    policy: Box<dyn VictimPolicy>,
}

impl StdDirectory {
    /// Creates an empty directory.
    ///
    /// # Arguments
    ///
    /// * `indexer` - Set-index function for this bank.
    /// * `assoc` - Ways per set.
    /// * `width` - Sharer width.
    /// * `policy` - Victim selection.
    pub fn new(indexer: SetIndexer, assoc: usize, width: usize, policy: Box<dyn VictimPolicy>) -> Self {
        Self {
            sets: (0..indexer.sets()).map(|_| vec![None; assoc]).collect(),
            indexer,
            assoc,
            width,
            policy,
        }
    }

    /// Returns the set holding `address`.
    pub fn set_index(&self, address: MemoryAddress) -> usize {
        self.indexer.index(address)
    }

    fn find(&self, address: MemoryAddress) -> Option<(usize, usize)> {
        let set = self.set_index(address);
        self.sets[set]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.tag == address))
            .map(|way| (set, way))
    }

    /// Returns the entry for `address`, updating replacement state.
    pub fn lookup(&mut self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        let (set, way) = self.find(address)?;
        self.policy.touch(set, way);
        self.sets[set][way].as_ref()
    }

    /// Returns the entry for `address` without touching replacement state.
    pub fn peek(&self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        let (set, way) = self.find(address)?;
        self.sets[set][way].as_ref()
    }

    /// Returns the entry for `address` for modification.
    pub fn entry_mut(&mut self, address: MemoryAddress) -> Option<&mut DirectoryEntry> {
        let (set, way) = self.find(address)?;
        self.sets[set][way].as_mut()
    }

    /// Makes room for `address` and installs an Invalid entry for it.
    ///
    /// # Returns
    ///
    /// `Installed` with any replaced entry that still has sharers, or `SetFull`
    /// if every way is protected.
    pub fn allocate(&mut self, address: MemoryAddress) -> Allocation {
        if self.find(address).is_some() {
            return Allocation::Installed { victims: Vec::new() };
        }
        let set = self.set_index(address);
        let ways = &self.sets[set];
        let free = ways.iter().position(|slot| slot.as_ref().is_none_or(DirectoryEntry::is_idle));
        let way = match free {
            Some(way) => way,
            None => {
                let info: Vec<WayInfo> = ways
                    .iter()
                    .map(|slot| WayInfo {
                        eligible: slot.as_ref().is_some_and(|e| !e.is_protected()),
                        sharers: slot.as_ref().map_or(0, |e| e.sharers.count_sharers()),
                    })
                    .collect();
                match self.policy.victim(set, &info) {
                    Some(way) => way,
                    None => {
                        debug!(%address, set, "directory set fully protected");
                        return Allocation::SetFull;
                    }
                }
            }
        };
        let victims: Vec<DirectoryEntry> = self.sets[set][way]
            .take()
            .filter(|old| !old.sharers.is_empty())
            .into_iter()
            .collect();
        for victim in &victims {
            debug!(victim = %victim.tag, %address, set, way, "directory replacement");
        }
        self.sets[set][way] = Some(DirectoryEntry::new(address, self.width));
        self.policy.install(set, way);
        Allocation::Installed { victims }
    }

    /// Returns true if both addresses map to the same set.
    pub fn same_set(&self, a: MemoryAddress, b: MemoryAddress) -> bool {
        self.set_index(a) == self.set_index(b)
    }

    /// Number of occupied ways.
    pub fn len(&self) -> usize {
        self.sets.iter().flatten().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no way is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over occupied ways in set/way order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.sets.iter().flatten().flatten()
    }

    /// Captures every occupied way.
    pub fn save_state(&self) -> DirectorySnapshot {
        let entries = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(set, ways)| {
                ways.iter().enumerate().filter_map(move |(way, slot)| {
                    slot.as_ref().map(|e| SlotSnapshot { set, way, entry: EntrySnapshot::capture(e) })
                })
            })
            .collect();
        DirectorySnapshot::Std { width: self.width, sets: self.sets.len(), assoc: self.assoc, entries }
    }

    /// Replaces the contents with a snapshot of identical geometry.
    pub fn load_state(&mut self, bank: usize, snapshot: &DirectorySnapshot) -> Result<()> {
        let DirectorySnapshot::Std { width, sets, assoc, entries } = snapshot else {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("expected a std snapshot, found {}", snapshot.kind()),
            });
        };
        if *width != self.width {
            return Err(shape_mismatch(bank, "sharer width", self.width, *width));
        }
        if *sets != self.sets.len() {
            return Err(shape_mismatch(bank, "set count", self.sets.len(), *sets));
        }
        if *assoc != self.assoc {
            return Err(shape_mismatch(bank, "associativity", self.assoc, *assoc));
        }
        let mut restored: Vec<Vec<Option<DirectoryEntry>>> = vec![vec![None; self.assoc]; self.sets.len()];
        for slot in entries {
            let entry = slot.entry.restore(bank, self.width)?;
            let home = self.set_index(entry.tag);
            if slot.set != home || slot.way >= self.assoc {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!(
                        "entry {} stored at set {} way {} but belongs in set {home}",
                        entry.tag, slot.set, slot.way
                    ),
                });
            }
            if restored[slot.set][slot.way].replace(entry).is_some() {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!("set {} way {} appears twice", slot.set, slot.way),
                });
            }
        }
        self.sets = restored;
        Ok(())
    }
}
