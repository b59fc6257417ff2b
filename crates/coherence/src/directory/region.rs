//! Region directory.
//!
//! One set-associative entry covers `blocks_per_region` contiguous blocks. The
//! entry holds a sub-entry per block plus a region summary: the single owner
//! when exactly one node holds any block of the region, or a `shared` flag when
//! several do. The summary is recomputed after every mutation. Replacing a
//! region evicts all of its blocks at once.

use tracing::debug;

use super::Allocation;
use super::entry::DirectoryEntry;
use super::geometry::SetIndexer;
use super::replacement::{VictimPolicy, WayInfo};
use super::snapshot::{DirectorySnapshot, EntrySnapshot, RegionSnapshot, SlotSnapshot, shape_mismatch};
use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::state::SharingVector;

/// Directory entry covering one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionEntry {
    /// Region base address.
    pub tag: MemoryAddress,
    /// Sole holder of blocks in the region; meaningful only when `shared` is false.
    pub owner: Option<NodeId>,
    /// More than one node holds blocks of the region.
    pub shared: bool,
    /// Per-block sub-entries in address order.
    pub blocks: Vec<DirectoryEntry>,
}

impl RegionEntry {
    fn new(tag: MemoryAddress, blocks: usize, block_size: u64, width: usize) -> Self {
        Self {
            tag,
            owner: None,
            shared: false,
            blocks: (0..blocks)
                .map(|i| DirectoryEntry::new(tag.offset(i as u64 * block_size), width))
                .collect(),
        }
    }

    /// Returns every node holding any block of the region.
    pub fn sharers(&self) -> Option<SharingVector> {
        let mut blocks = self.blocks.iter();
        let mut all = blocks.next()?.sharers.clone();
        for b in blocks {
            all |= &b.sharers;
        }
        Some(all)
    }

    /// Recomputes `owner` and `shared` from the block sub-entries.
    pub fn refresh(&mut self) {
        let all = self.sharers();
        let count = all.as_ref().map_or(0, SharingVector::count_sharers);
        self.shared = count > 1;
        self.owner = if count == 1 { all.and_then(|s| s.first_sharer()) } else { None };
    }

    /// Returns true if any block is held by an in-flight transaction.
    pub fn is_protected(&self) -> bool {
        self.blocks.iter().any(DirectoryEntry::is_protected)
    }

    /// Returns true if the region can be dropped without notifying anyone.
    pub fn is_idle(&self) -> bool {
        self.blocks.iter().all(DirectoryEntry::is_idle)
    }
}

/// Region-level view of one block returned by [`RegionDirectory::native_lookup`].
#[derive(Clone, Copy, Debug)]
pub struct RegionLookup<'a> {
    /// The region entry.
    pub region: &'a RegionEntry,
    /// Index of the looked-up block within the region.
    pub block: usize,
}

impl RegionLookup<'_> {
    /// Returns the sub-entry of the looked-up block.
    pub fn entry(&self) -> &DirectoryEntry {
        &self.region.blocks[self.block]
    }

    /// Returns the region owner, if the region is not shared.
    pub const fn region_owner(&self) -> Option<NodeId> {
        if self.region.shared { None } else { self.region.owner }
    }

    /// Returns true if several nodes hold blocks of the region.
    pub const fn region_shared(&self) -> bool {
        self.region.shared
    }
}

/// Set-associative directory of regions.
#[derive(Debug)]
pub struct RegionDirectory {
    sets: Vec<Vec<Option<RegionEntry>>>,
    indexer: SetIndexer,
    assoc: usize,
    width: usize,
    block_size: u64,
    region_size: u64,
    policy: Box<dyn VictimPolicy>,
}

impl RegionDirectory {
    /// Creates an empty region directory.
    ///
    /// # Arguments
    ///
    /// * `indexer` - Set-index function over region addresses.
    /// * `assoc` - Ways per set.
    /// * `width` - Sharer width.
    /// * `block_size` - Block size in bytes.
    /// * `region_size` - Region size in bytes; a multiple of `block_size`.
    /// * `policy` - Victim selection.
    pub fn new(
        indexer: SetIndexer,
        assoc: usize,
        width: usize,
        block_size: u64,
        region_size: u64,
        policy: Box<dyn VictimPolicy>,
    ) -> Self {
        Self {
            sets: (0..indexer.sets()).map(|_| vec![None; assoc]).collect(),
            indexer,
            assoc,
            width,
            block_size,
            region_size,
            policy,
        }
    }

    /// Blocks tracked per region.
    pub const fn blocks_per_region(&self) -> usize {
        (self.region_size / self.block_size) as usize
    }

    /// Returns the base address of the region containing `address`.
    pub const fn get_region(&self, address: MemoryAddress) -> MemoryAddress {
        address.region_aligned(self.region_size)
    }

    const fn block_of(&self, address: MemoryAddress) -> usize {
        address.block_in_region(self.block_size, self.region_size)
    }

    /// Returns the set holding the region of `address`.
    pub fn set_index(&self, address: MemoryAddress) -> usize {
        self.indexer.index(self.get_region(address))
    }

    fn find(&self, address: MemoryAddress) -> Option<(usize, usize)> {
        let region = self.get_region(address);
        let set = self.indexer.index(region);
        self.sets[set]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.tag == region))
            .map(|way| (set, way))
    }

    /// Returns the region-level view of `address`, updating replacement state.
    pub fn native_lookup(&mut self, address: MemoryAddress) -> Option<RegionLookup<'_>> {
        let (set, way) = self.find(address)?;
        self.policy.touch(set, way);
        let block = self.block_of(address);
        self.sets[set][way].as_ref().map(|region| RegionLookup { region, block })
    }

    /// Returns the block sub-entry of `address` if its region is present.
    pub fn lookup(&mut self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        let block = self.block_of(address);
        let (set, way) = self.find(address)?;
        self.policy.touch(set, way);
        self.sets[set][way].as_ref().map(|r| &r.blocks[block])
    }

    /// Returns the block sub-entry without touching replacement state.
    pub fn peek(&self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        let (set, way) = self.find(address)?;
        self.sets[set][way].as_ref().map(|r| &r.blocks[self.block_of(address)])
    }

    /// Applies `f` to the block sub-entry of `address` and refreshes the region summary.
    pub fn update<R>(&mut self, address: MemoryAddress, f: impl FnOnce(&mut DirectoryEntry) -> R) -> Option<R> {
        let block = self.block_of(address);
        let (set, way) = self.find(address)?;
        let region = self.sets[set][way].as_mut()?;
        let out = f(&mut region.blocks[block]);
        region.refresh();
        Some(out)
    }

    /// Makes room for the region of `address`.
    ///
    /// # Returns
    ///
    /// `Installed` with every block of a replaced region that still has
    /// sharers, or `SetFull` if every region in the set is protected.
    pub fn allocate(&mut self, address: MemoryAddress) -> Allocation {
        if self.find(address).is_some() {
            return Allocation::Installed { victims: Vec::new() };
        }
        let region = self.get_region(address);
        let set = self.indexer.index(region);
        let ways = &self.sets[set];
        let way = match ways.iter().position(|slot| slot.as_ref().is_none_or(RegionEntry::is_idle)) {
            Some(way) => way,
            None => {
                let info: Vec<WayInfo> = ways
                    .iter()
                    .map(|slot| WayInfo {
                        eligible: slot.as_ref().is_some_and(|r| !r.is_protected()),
                        sharers: slot
                            .as_ref()
                            .and_then(RegionEntry::sharers)
                            .map_or(0, |s| s.count_sharers()),
                    })
                    .collect();
                match self.policy.victim(set, &info) {
                    Some(way) => way,
                    None => {
                        debug!(%address, %region, set, "region set fully protected");
                        return Allocation::SetFull;
                    }
                }
            }
        };
        let victims: Vec<DirectoryEntry> = self.sets[set][way]
            .take()
            .map(|old| {
                debug!(victim = %old.tag, %region, set, way, "region replacement");
                old.blocks.into_iter().filter(|b| !b.sharers.is_empty()).collect()
            })
            .unwrap_or_default();
        self.sets[set][way] =
            Some(RegionEntry::new(region, self.blocks_per_region(), self.block_size, self.width));
        self.policy.install(set, way);
        Allocation::Installed { victims }
    }

    /// Returns true if both addresses map to the same set.
    pub fn same_set(&self, a: MemoryAddress, b: MemoryAddress) -> bool {
        self.set_index(a) == self.set_index(b)
    }

    /// Number of occupied region entries.
    pub fn len(&self) -> usize {
        self.sets.iter().flatten().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no region is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over occupied regions.
    pub fn regions(&self) -> impl Iterator<Item = &RegionEntry> {
        self.sets.iter().flatten().flatten()
    }

    /// Captures every occupied region.
    pub fn save_state(&self) -> DirectorySnapshot {
        let entries = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(set, ways)| {
                ways.iter().enumerate().filter_map(move |(way, slot)| {
                    slot.as_ref().map(|r| SlotSnapshot {
                        set,
                        way,
                        entry: RegionSnapshot {
                            tag: r.tag,
                            owner: r.owner,
                            shared: r.shared,
                            blocks: r.blocks.iter().map(EntrySnapshot::capture).collect(),
                        },
                    })
                })
            })
            .collect();
        DirectorySnapshot::Region {
            width: self.width,
            sets: self.sets.len(),
            assoc: self.assoc,
            blocks_per_region: self.blocks_per_region(),
            entries,
        }
    }

    /// Replaces the contents with a snapshot of identical geometry.
    pub fn load_state(&mut self, bank: usize, snapshot: &DirectorySnapshot) -> Result<()> {
        let DirectorySnapshot::Region { width, sets, assoc, blocks_per_region, entries } = snapshot else {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("expected a region snapshot, found {}", snapshot.kind()),
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
        if *blocks_per_region != self.blocks_per_region() {
            return Err(shape_mismatch(bank, "blocks per region", self.blocks_per_region(), *blocks_per_region));
        }
        let mut restored: Vec<Vec<Option<RegionEntry>>> = vec![vec![None; self.assoc]; self.sets.len()];
        for slot in entries {
            let record = &slot.entry;
            if record.blocks.len() != self.blocks_per_region() {
                return Err(shape_mismatch(
                    bank,
                    &format!("block count of region {}", record.tag),
                    self.blocks_per_region(),
                    record.blocks.len(),
                ));
            }
            let home = self.indexer.index(record.tag);
            if record.tag != self.get_region(record.tag) || slot.set != home || slot.way >= self.assoc {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!(
                        "region {} stored at set {} way {} but belongs in set {home}",
                        record.tag, slot.set, slot.way
                    ),
                });
            }
            let mut region = RegionEntry { tag: record.tag, owner: None, shared: false, blocks: Vec::new() };
            for (i, block) in record.blocks.iter().enumerate() {
                let expected = record.tag.offset(i as u64 * self.block_size);
                if block.tag != expected {
                    return Err(DirectoryError::SnapshotMismatch {
                        bank,
                        reason: format!("block {i} of region {} has tag {}", record.tag, block.tag),
                    });
                }
                region.blocks.push(block.restore(bank, self.width)?);
            }
            region.refresh();
            if region.owner != record.owner || region.shared != record.shared {
                return Err(DirectoryError::SnapshotMismatch {
                    bank,
                    reason: format!("region {} summary does not match its blocks", record.tag),
                });
            }
            if restored[slot.set][slot.way].replace(region).is_some() {
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
