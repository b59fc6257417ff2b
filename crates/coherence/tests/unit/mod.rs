//! # Engine Unit and Scenario Tests
//!
//! Tests are grouped by the part of the engine they exercise, from the
//! sharer bitset up to whole-controller scenarios.

/// Sharing vector properties.
pub mod sharing;

/// Configuration parsing, defaults and validation.
pub mod config;

/// Inclusive MOESI request flows.
pub mod moesi;

/// Same-address ordering and MAF backpressure.
pub mod ordering;

/// Evict Buffer draining, reinstalls and cache evictions.
pub mod eviction;

/// Tagless filter soundness and sequential snooping.
pub mod tagless;

/// Checkpoint save and restore.
pub mod snapshot;

/// Bank routing.
pub mod routing;
