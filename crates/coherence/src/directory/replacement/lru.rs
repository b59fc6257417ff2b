//! Least Recently Used (LRU) Replacement Policy.
//!
//! Keeps a usage stack per set. A touched way moves to the top (MRU); the
//! victim is the eligible way closest to the bottom.

use super::{VictimPolicy, WayInfo};

/// LRU Policy state.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    /// Usage stacks, one per set. Index 0 is MRU.
    usage: Vec<Vec<usize>>,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of directory sets.
    /// * `ways` - The associativity.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self { usage: (0..sets).map(|_| (0..ways).collect()).collect() }
    }
}

impl VictimPolicy for LruPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        if let Some(pos) = stack.iter().position(|&x| x == way) {
            let _ = stack.remove(pos);
        }
        stack.insert(0, way);
    }

    fn victim(&mut self, set: usize, ways: &[WayInfo]) -> Option<usize> {
        self.usage[set]
            .iter()
            .rev()
            .copied()
            .find(|&way| ways.get(way).is_some_and(|w| w.eligible))
    }
}
