//! Set-index computation for set-associative directories.
//!
//! Banks are selected by the address bits just above the interleaving
//! granularity, so every bank only ever sees addresses with identical bank bits.
//! The set index skips those bits: it takes the unit-offset-to-interleaving bits
//! as its low part and the bits above the bank-select field as its high part.

use crate::common::MemoryAddress;
use crate::common::constants::SKEW_HASH_BITS;

/// Maps addresses to set numbers for one bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetIndexer {
    unit_bits: u32,
    low_mask: u64,
    high_shift: u32,
    high_mask: u64,
    skew_shift: Option<u32>,
    sets: usize,
}

impl SetIndexer {
    /// Builds an indexer.
    ///
    /// # Arguments
    ///
    /// * `unit_size` - Bytes covered by one entry (block or region size).
    /// * `banks` - Number of banks sharing the address space.
    /// * `interleaving` - Bank interleaving granularity in bytes.
    /// * `sets` - Number of sets in this bank; a power of two.
    /// * `skew` - Fold high address bits into the index.
    pub fn new(unit_size: u64, banks: usize, interleaving: u64, sets: usize, skew: bool) -> Self {
        let unit_bits = unit_size.trailing_zeros();
        let bank_bits = banks.trailing_zeros();
        let index_bits = sets.trailing_zeros();
        let interleave_bits = interleaving.trailing_zeros();
        let low_bits = interleave_bits.saturating_sub(unit_bits).min(index_bits);
        let high_bits = index_bits - low_bits;
        let skew_shift = SKEW_HASH_BITS
            .checked_sub(index_bits + bank_bits + unit_bits)
            .filter(|&s| skew && s > 0);
        Self {
            unit_bits,
            low_mask: (1u64 << low_bits) - 1,
            high_shift: unit_bits + bank_bits,
            high_mask: ((1u64 << high_bits) - 1) << low_bits,
            skew_shift,
            sets,
        }
    }

    /// Returns the number of sets.
    pub const fn sets(&self) -> usize {
        self.sets
    }

    /// Returns the set holding `address`.
    pub fn index(&self, address: MemoryAddress) -> usize {
        let mut a = address.val();
        if let Some(shift) = self.skew_shift {
            a ^= a >> shift;
        }
        let low = (a >> self.unit_bits) & self.low_mask;
        let high = (a >> self.high_shift) & self.high_mask;
        ((low | high) as usize) % self.sets
    }
}
