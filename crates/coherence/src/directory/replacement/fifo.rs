//! First-In, First-Out (FIFO) Replacement Policy.
//!
//! Round-robin pointer per set. The pointer skips ways that are not eligible,
//! and advances past the way it hands out or that gets installed under it.

use super::{VictimPolicy, WayInfo};

/// FIFO Policy state.
#[derive(Debug, Clone)]
pub struct FifoPolicy {
    /// Next way to consider for each set.
    next_way: Vec<usize>,
    /// Associativity.
    ways: usize,
}

impl FifoPolicy {
    /// Creates a new FIFO policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of directory sets.
    /// * `ways` - The associativity.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self { next_way: vec![0; sets], ways: ways.max(1) }
    }
}

impl VictimPolicy for FifoPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn install(&mut self, set: usize, way: usize) {
        if self.next_way[set] == way {
            self.next_way[set] = (way + 1) % self.ways;
        }
    }

    fn victim(&mut self, set: usize, ways: &[WayInfo]) -> Option<usize> {
        let start = self.next_way[set];
        (0..self.ways)
            .map(|i| (start + i) % self.ways)
            .find(|&way| ways.get(way).is_some_and(|w| w.eligible))
    }
}
