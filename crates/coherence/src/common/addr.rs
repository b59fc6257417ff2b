//! Block address types.
//!
//! The directory tracks coherence per block. This module provides:
//! 1. **Type Safety:** `MemoryAddress` keeps raw integers and block addresses apart.
//! 2. **Alignment Helpers:** Block and region alignment used by every directory variant.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a cache node (processor-side cache) in a sharing vector.
pub type NodeId = usize;

/// A physical memory address as seen by the directory.
///
/// Addresses arriving at a bank are block-aligned by the controller before any
/// lookup, so two requests to the same block always compare equal.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MemoryAddress(pub u64);

impl MemoryAddress {
    /// Creates a new address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Aligns the address down to the start of its block.
    ///
    /// # Arguments
    ///
    /// * `block_size` - Block size in bytes; must be a power of two.
    ///
    /// # Returns
    ///
    /// The address of the first byte of the containing block.
    #[inline(always)]
    pub const fn block_aligned(self, block_size: u64) -> Self {
        Self(self.0 & !(block_size - 1))
    }

    /// Aligns the address down to the start of its region.
    ///
    /// # Arguments
    ///
    /// * `region_size` - Region size in bytes; must be a power of two.
    #[inline(always)]
    pub const fn region_aligned(self, region_size: u64) -> Self {
        Self(self.0 & !(region_size - 1))
    }

    /// Returns the block number of this address within its region.
    ///
    /// # Arguments
    ///
    /// * `block_size` - Block size in bytes.
    /// * `region_size` - Region size in bytes.
    #[inline(always)]
    pub const fn block_in_region(self, block_size: u64, region_size: u64) -> usize {
        ((self.0 & (region_size - 1)) / block_size) as usize
    }

    /// Returns the address `bytes` past this one.
    #[inline(always)]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for MemoryAddress {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}
