//! Common types and constants shared by every part of the coherence engine.
//!
//! This module provides the building blocks used across the directory banks. It includes:
//! 1. **Address Types:** A strong type for block addresses and the node identifier alias.
//! 2. **Constants:** Sharer-width limits and default geometry values.
//! 3. **Error Handling:** The fatal error type and the crate-wide `Result` alias.

/// Block address and node identifier types.
pub mod addr;

/// Engine-wide constants.
pub mod constants;

/// Fatal error definitions.
pub mod error;

pub use addr::{MemoryAddress, NodeId};
pub use constants::{DEFAULT_BLOCK_SIZE, MAX_NUM_SHARERS};
pub use error::{DirectoryError, Result};
