//! Directory cache-coherence engine.
//!
//! This crate implements the directory side of a multiprocessor memory-system
//! simulator with the following:
//! 1. **State:** The MOESI lattice, modifier bits and fixed-width sharing vectors.
//! 2. **Directory Storage:** Infinite, set-associative, region and tagless variants.
//! 3. **Serialization:** The Miss Address File and the Evict Buffer.
//! 4. **Protocols:** Inclusive MOESI (with migratory detection) and the tagless protocol.
//! 5. **Banking:** Per-bank pipelines behind a controller that routes and checkpoints them.

/// Common types and constants (addresses, node ids, errors).
pub mod common;
/// Engine configuration and directory parameter strings.
pub mod config;
/// Coherence states and sharing vectors.
pub mod state;
/// Directory storage variants and their registry.
pub mod directory;
/// Coherence messages and channels.
pub mod message;
/// Bounded message queues.
pub mod queue;
/// Scheduled units of bank work.
pub mod process;
/// Per-address transaction state and snoop fan-out.
pub mod transaction;
/// Miss Address File.
pub mod maf;
/// Evict Buffer.
pub mod evict_buffer;
/// Protocol policies and their registry.
pub mod protocol;
/// Directory bank pipeline.
pub mod bank;
/// Banked controller.
pub mod controller;

/// One directory shard; owns storage, MAF, Evict Buffer and policy.
pub use crate::bank::DirectoryBank;
/// Fatal error type and result alias.
pub use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
/// Engine configuration; use `DirectoryConfig::default()` or deserialize from JSON.
pub use crate::config::DirectoryConfig;
/// Top-level engine; construct with `BankedController::new`.
pub use crate::controller::BankedController;
/// Coherence messages.
pub use crate::message::{Destination, MessageKind, Transport};
/// Coherence state and sharer set types.
pub use crate::state::{CacheState, SharingVector};
