//! Engine-wide constants.
//!
//! These values bound every configurable structure in the engine:
//! 1. **Sharer Limits:** The widest sharing vector a bank may be configured with.
//! 2. **Geometry Defaults:** Block size and the bit width of a packed sharer word.

/// Largest number of nodes a sharing vector can track.
pub const MAX_NUM_SHARERS: usize = 512;

/// Default coherence block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 64;

/// Number of sharer bits held by one storage word.
pub const SHARER_WORD_BITS: usize = 64;

/// Hash width used to derive the skewed set index of an exact directory.
pub const SKEW_HASH_BITS: u32 = 34;
