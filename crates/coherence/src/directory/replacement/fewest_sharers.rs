//! Fewest-Sharers Replacement Policy.
//!
//! Evicts the eligible entry tracking the fewest sharers; ties go to the lowest
//! way. Every sharer of a victim must be back-invalidated before its Evict
//! Buffer slot frees, so small sharer sets drain fastest.

use super::{VictimPolicy, WayInfo};

/// Fewest-sharers policy. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct FewestSharersPolicy;

impl VictimPolicy for FewestSharersPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn victim(&mut self, _set: usize, ways: &[WayInfo]) -> Option<usize> {
        ways.iter()
            .enumerate()
            .filter(|(_, w)| w.eligible)
            .min_by_key(|(way, w)| (w.sharers, *way))
            .map(|(way, _)| way)
    }
}
