//! Miss Address File.
//!
//! The MAF gives every address a total order of operations. The first
//! operation on an address becomes the entry's active operation; later ones
//! wait in a FIFO behind it. When the active operation completes, the entry
//! moves to `Waking` and the bank redispatches the waiters one at a time in
//! arrival order; new arrivals keep queueing behind them, so same-address
//! operations are strictly FIFO.
//!
//! An active request may also park itself at the head of its own queue while
//! it waits for a directory way (`BlockReason::Set`) or for its address to leave
//! the Evict Buffer (`BlockReason::Evict`).
//!
//! Capacity counts every operation the MAF owns (active, parked or waiting).
//! Callers check [`MissAddressFile::full`] before admitting a request; inserting
//! into a full MAF is a contract violation.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::common::{DirectoryError, MemoryAddress, Result};
use crate::message::Transport;
use crate::process::ProcessEntry;
use crate::transaction::Transaction;

/// What a parked operation is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// A way in the address's directory set.
    Set,
    /// The address's Evict Buffer entry to drain.
    Evict,
}

/// Lifecycle of a MAF entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MafState {
    /// The head operation is being serviced.
    Active,
    /// The head operation is parked at the front of the queue.
    Parked(BlockReason),
    /// The head waiter is ready to be redispatched.
    Waking,
}

#[derive(Debug)]
struct MafEntry {
    state: MafState,
    transaction: Option<Transaction>,
    waiters: VecDeque<ProcessEntry>,
}

/// Outcome of [`MissAddressFile::insert`].
#[derive(Debug)]
pub enum MafInsert {
    /// No operation was in flight; the caller services this one now.
    First(ProcessEntry),
    /// Queued behind the in-flight operation.
    Queued,
}

/// Per-bank table serializing operations by address.
#[derive(Debug)]
pub struct MissAddressFile {
    entries: BTreeMap<MemoryAddress, MafEntry>,
    waking: VecDeque<MemoryAddress>,
    used: usize,
    capacity: usize,
    bank: usize,
}

impl MissAddressFile {
    /// Creates an empty MAF.
    ///
    /// # Arguments
    ///
    /// * `bank` - Owning bank, for diagnostics.
    /// * `capacity` - Maximum number of owned operations.
    pub const fn new(bank: usize, capacity: usize) -> Self {
        Self { entries: BTreeMap::new(), waking: VecDeque::new(), used: 0, capacity, bank }
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of owned operations.
    pub const fn len(&self) -> usize {
        self.used
    }

    /// Returns true if no address is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if no further operation may be admitted.
    pub const fn full(&self) -> bool {
        self.used >= self.capacity
    }

    /// Returns true if `address` has an entry.
    pub fn contains(&self, address: MemoryAddress) -> bool {
        self.entries.contains_key(&address)
    }

    /// Returns the state of the entry for `address`.
    pub fn state(&self, address: MemoryAddress) -> Option<MafState> {
        self.entries.get(&address).map(|e| e.state)
    }

    /// Returns the messages waiting behind `address`, oldest first.
    pub fn waiters(&self, address: MemoryAddress) -> Vec<&Transport> {
        self.entries.get(&address).map(|e| e.waiters.iter().map(|p| &p.transport).collect()).unwrap_or_default()
    }

    /// Addresses whose head operation is being serviced.
    pub fn active_addresses(&self) -> Vec<MemoryAddress> {
        self.entries.iter().filter(|(_, e)| e.state == MafState::Active).map(|(a, _)| *a).collect()
    }

    fn violation(&self, address: MemoryAddress, message: String) -> DirectoryError {
        DirectoryError::ProtocolViolation {
            bank: self.bank,
            address,
            state: self.state(address).map_or_else(|| "NoMAF".to_string(), |s| format!("{s:?}")),
            message,
        }
    }

    /// Admits `process`.
    ///
    /// # Returns
    ///
    /// `First(process)` if the address was idle (the caller continues with it),
    /// `Queued` if it now waits behind an earlier operation, or
    /// `CapacityExceeded` if the MAF was already full.
    pub fn insert(&mut self, process: ProcessEntry) -> Result<MafInsert> {
        if self.full() {
            return Err(DirectoryError::CapacityExceeded {
                structure: "MAF",
                bank: self.bank,
                capacity: self.capacity,
            });
        }
        self.used += 1;
        let address = process.transport.address;
        if let Some(entry) = self.entries.get_mut(&address) {
            debug!(bank = self.bank, %address, depth = entry.waiters.len() + 1, "MAF queued");
            entry.waiters.push_back(process);
            return Ok(MafInsert::Queued);
        }
        let _ = self.entries.insert(
            address,
            MafEntry { state: MafState::Active, transaction: None, waiters: VecDeque::new() },
        );
        Ok(MafInsert::First(process))
    }

    /// Parks the active operation of its address at the head of the queue.
    pub fn park(&mut self, process: ProcessEntry, reason: BlockReason) -> Result<()> {
        let address = process.transport.address;
        match self.entries.get_mut(&address) {
            Some(entry) if entry.state == MafState::Active && entry.transaction.is_none() => {
                debug!(bank = self.bank, %address, ?reason, "MAF park");
                entry.state = MafState::Parked(reason);
                entry.waiters.push_front(process);
                Ok(())
            }
            _ => Err(self.violation(address, "park without an idle active slot".to_string())),
        }
    }

    /// Records the transaction opened by the active operation on `address`.
    pub fn begin(&mut self, address: MemoryAddress, transaction: Transaction) -> Result<()> {
        match self.entries.get_mut(&address) {
            Some(entry) if entry.state == MafState::Active && entry.transaction.is_none() => {
                entry.transaction = Some(transaction);
                Ok(())
            }
            _ => Err(self.violation(address, "transaction opened twice".to_string())),
        }
    }

    /// Returns the transaction in flight on `address`.
    pub fn transaction(&self, address: MemoryAddress) -> Option<&Transaction> {
        self.entries.get(&address).and_then(|e| e.transaction.as_ref())
    }

    /// Returns the transaction in flight on `address` for modification.
    pub fn transaction_mut(&mut self, address: MemoryAddress) -> Option<&mut Transaction> {
        self.entries.get_mut(&address).and_then(|e| e.transaction.as_mut())
    }

    /// Closes the transaction on `address` and starts waking its waiters.
    ///
    /// # Returns
    ///
    /// The closed transaction. The entry is removed if nobody was waiting.
    pub fn complete(&mut self, address: MemoryAddress) -> Result<Transaction> {
        let Some(entry) = self.entries.get_mut(&address) else {
            return Err(self.violation(address, "completion without a MAF entry".to_string()));
        };
        let Some(transaction) = entry.transaction.take() else {
            return Err(self.violation(address, "completion without a transaction".to_string()));
        };
        self.used -= 1;
        if entry.waiters.is_empty() {
            let _ = self.entries.remove(&address);
        } else {
            debug!(bank = self.bank, %address, waiters = entry.waiters.len(), "MAF wake");
            entry.state = MafState::Waking;
            self.waking.push_back(address);
        }
        Ok(transaction)
    }

    /// Wakes parked entries accepted by `pred`.
    ///
    /// # Returns
    ///
    /// The number of entries woken.
    pub fn wake_parked(&mut self, mut pred: impl FnMut(MemoryAddress, BlockReason) -> bool) -> usize {
        let mut woken = 0;
        for (address, entry) in &mut self.entries {
            if let MafState::Parked(reason) = entry.state
                && pred(*address, reason)
            {
                debug!(bank = self.bank, %address, ?reason, "MAF unpark");
                entry.state = MafState::Waking;
                self.waking.push_back(*address);
                woken += 1;
            }
        }
        woken
    }

    /// Returns true if a woken operation is ready for redispatch.
    pub fn has_waking(&self) -> bool {
        !self.waking.is_empty()
    }

    /// Returns the next operation [`take_waking`](Self::take_waking) would return.
    pub fn peek_waking(&self) -> Option<&ProcessEntry> {
        self.waking.front().and_then(|a| self.entries.get(a)).and_then(|e| e.waiters.front())
    }

    /// Removes the next woken operation; it becomes the active one of its address.
    pub fn take_waking(&mut self) -> Option<ProcessEntry> {
        while let Some(address) = self.waking.pop_front() {
            let Some(entry) = self.entries.get_mut(&address) else {
                continue;
            };
            if let Some(process) = entry.waiters.pop_front() {
                entry.state = MafState::Active;
                return Some(process);
            }
            let _ = self.entries.remove(&address);
        }
        None
    }
}
