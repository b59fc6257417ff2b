//! Evict Buffer.
//!
//! Directory entries replaced while caches still hold the block are parked
//! here until every sharer has been back-invalidated. The buffer is a bounded
//! FIFO: the oldest entry not yet invalidating is the next one drained.
//!
//! An entry is freed as soon as it has no sharers and no outstanding
//! BackInvalidate acknowledgments.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::directory::DirectoryEntry;
use crate::message::{Destination, MessageKind, Transport};
use crate::state::SharingVector;

/// A replaced directory entry waiting to drain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictEntry {
    /// The replaced entry; its sharers shrink as acknowledgments arrive.
    pub entry: DirectoryEntry,
    /// Nodes whose BackInvalidate acknowledgment is outstanding.
    pub awaiting: SharingVector,
    /// BackInvalidate has been sent.
    pub invalidating: bool,
}

impl EvictEntry {
    /// Returns true once nothing references the block anymore.
    pub fn drained(&self) -> bool {
        self.entry.sharers.is_empty() && self.awaiting.is_empty()
    }
}

/// Result of removing a node from an Evict Buffer entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictProgress {
    /// The address has no Evict Buffer entry, or the node was not awaited.
    NotFound,
    /// The entry still references other nodes.
    Pending,
    /// The entry drained and its slot was released.
    Freed,
}

/// Per-bank buffer of replaced entries.
#[derive(Debug)]
pub struct EvictBuffer {
    entries: VecDeque<EvictEntry>,
    capacity: usize,
    bank: usize,
}

impl EvictBuffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    pub fn new(bank: usize, capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity, bank }
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if every slot is occupied.
    pub fn full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Number of free slots.
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Returns true if at least `n` slots are free.
    pub fn has_space(&self, n: usize) -> bool {
        self.free_slots() >= n
    }

    /// Buffers a replaced entry.
    ///
    /// # Returns
    ///
    /// `CapacityExceeded` if the caller skipped the space check.
    pub fn allocate(&mut self, entry: DirectoryEntry) -> Result<()> {
        if self.full() {
            return Err(DirectoryError::CapacityExceeded {
                structure: "EvictBuffer",
                bank: self.bank,
                capacity: self.capacity,
            });
        }
        debug!(bank = self.bank, address = %entry.tag, sharers = %entry.sharers, "EB allocate");
        let awaiting = SharingVector::new(entry.sharers.width());
        self.entries.push_back(EvictEntry { entry, awaiting, invalidating: false });
        Ok(())
    }

    /// Returns the buffered entry for `address`.
    pub fn find(&self, address: MemoryAddress) -> Option<&EvictEntry> {
        self.entries.iter().find(|e| e.entry.tag == address)
    }

    fn position(&self, address: MemoryAddress) -> Option<usize> {
        self.entries.iter().position(|e| e.entry.tag == address)
    }

    /// Removes the entry for `address` and returns its directory entry.
    pub fn remove(&mut self, address: MemoryAddress) -> Option<DirectoryEntry> {
        let idx = self.position(address)?;
        self.entries.remove(idx).map(|e| e.entry)
    }

    /// Iterates over the buffered entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EvictEntry> {
        self.entries.iter()
    }

    /// Number of entries with BackInvalidates in flight.
    pub fn invalidating_count(&self) -> usize {
        self.entries.iter().filter(|e| e.invalidating).count()
    }

    /// Returns true if some entry still needs its BackInvalidate sent.
    pub fn needs_invalidation(&self) -> bool {
        self.entries.iter().any(|e| !e.invalidating)
    }

    /// Builds the BackInvalidate for the oldest entry not yet invalidating.
    ///
    /// The snoop is multicast to every remaining sharer; its requester field
    /// names the first sharer.
    pub fn evict_block_transport(&self) -> Option<Transport> {
        let next = self.entries.iter().find(|e| !e.invalidating)?;
        let sharers = &next.entry.sharers;
        let requester = sharers.first_sharer()?;
        let destination = if sharers.one_sharer() {
            Destination::Node(requester)
        } else {
            Destination::Multicast(sharers.clone())
        };
        Some(Transport::outbound(MessageKind::BackInvalidate, next.entry.tag, requester, destination))
    }

    /// Marks the entry for `address` as invalidating its current sharers.
    ///
    /// # Returns
    ///
    /// The snooped sharers, or `None` if the entry is missing or already invalidating.
    pub fn start_invalidation(&mut self, address: MemoryAddress) -> Option<SharingVector> {
        let idx = self.position(address)?;
        let entry = &mut self.entries[idx];
        if entry.invalidating {
            return None;
        }
        entry.invalidating = true;
        entry.awaiting = entry.entry.sharers.clone();
        debug!(bank = self.bank, %address, targets = %entry.awaiting, "EB back-invalidate");
        Some(entry.awaiting.clone())
    }

    /// Returns true if `node`'s BackInvalidate acknowledgment for `address` is outstanding.
    pub fn is_awaiting(&self, address: MemoryAddress, node: NodeId) -> bool {
        self.find(address).is_some_and(|e| e.awaiting.is_sharer(node).unwrap_or(false))
    }

    /// Integrates a BackInvalidate acknowledgment from `node`.
    pub fn record_ack(&mut self, address: MemoryAddress, node: NodeId) -> Result<EvictProgress> {
        let Some(idx) = self.position(address) else {
            return Ok(EvictProgress::NotFound);
        };
        let entry = &mut self.entries[idx];
        if !entry.awaiting.is_sharer(node)? {
            return Ok(EvictProgress::NotFound);
        }
        entry.awaiting.remove_sharer(node)?;
        let _ = entry.entry.remove_sharer(node)?;
        Ok(self.release_if_drained(idx))
    }

    /// Drops `node` from the buffered entry after the cache evicted the block itself.
    pub fn remove_sharer(&mut self, address: MemoryAddress, node: NodeId) -> Result<EvictProgress> {
        let Some(idx) = self.position(address) else {
            return Ok(EvictProgress::NotFound);
        };
        let _ = self.entries[idx].entry.remove_sharer(node)?;
        Ok(self.release_if_drained(idx))
    }

    fn release_if_drained(&mut self, idx: usize) -> EvictProgress {
        if !self.entries[idx].drained() {
            return EvictProgress::Pending;
        }
        if let Some(done) = self.entries.remove(idx) {
            debug!(bank = self.bank, address = %done.entry.tag, "EB free");
        }
        EvictProgress::Freed
    }
}
