//! Directory Replacement Policies.
//!
//! Selects which entry of a full set an exact or region directory gives up.
//! Unlike a cache, a directory may not replace an entry whose block is part of an
//! in-flight transaction, so every policy only chooses among ways marked
//! eligible; if none is, the request must stall on the set.
//!
//! # Policies
//!
//! - `FewestSharers`: Fewest sharers first, so the fewest back-invalidations are needed.
//! - `Fifo`: First-In, First-Out.
//! - `Lru`: Least Recently Used.
//! - `Random`: Random selection.

/// Fewest-sharers replacement policy.
pub mod fewest_sharers;

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Random replacement policy.
pub mod random;

use std::fmt;

pub use fewest_sharers::FewestSharersPolicy;
pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

use crate::config::ReplacementPolicy;

/// What a policy may know about one way of a set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WayInfo {
    /// Way holds a live entry that may be replaced.
    pub eligible: bool,
    /// Number of sharers the entry tracks.
    pub sharers: usize,
}

/// Trait for directory replacement policies.
pub trait VictimPolicy: Send + Sync + fmt::Debug {
    /// Updates the policy state when an entry is looked up or modified.
    ///
    /// # Arguments
    ///
    /// * `set` - The directory set index.
    /// * `way` - The way that was touched.
    fn touch(&mut self, set: usize, way: usize);

    /// Updates the policy state when a new entry is installed.
    fn install(&mut self, set: usize, way: usize) {
        self.touch(set, way);
    }

    /// Selects a victim among the eligible ways of `set`.
    ///
    /// # Arguments
    ///
    /// * `set` - The directory set index.
    /// * `ways` - One view per way, in way order.
    ///
    /// # Returns
    ///
    /// The way to replace, or `None` if no way is eligible.
    fn victim(&mut self, set: usize, ways: &[WayInfo]) -> Option<usize>;
}

/// Builds the policy named by `kind` for a `sets` x `ways` structure.
pub fn build(kind: ReplacementPolicy, sets: usize, ways: usize) -> Box<dyn VictimPolicy> {
    match kind {
        ReplacementPolicy::FewestSharers => Box::new(FewestSharersPolicy),
        ReplacementPolicy::Lru => Box::new(LruPolicy::new(sets, ways)),
        ReplacementPolicy::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        ReplacementPolicy::Random => Box::new(RandomPolicy::new(sets, ways)),
    }
}
