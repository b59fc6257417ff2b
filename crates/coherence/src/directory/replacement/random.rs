//! Random Replacement Policy.
//!
//! Picks a pseudo-random eligible way using an xorshift generator. The seed is
//! fixed so runs are reproducible.

use super::{VictimPolicy, WayInfo};

/// Random Policy state.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    /// Internal state for the pseudo-random number generator.
    state: u64,
}

impl RandomPolicy {
    /// Creates a new Random policy instance.
    pub const fn new(_sets: usize, _ways: usize) -> Self {
        Self { state: 123456789 }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

impl VictimPolicy for RandomPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn victim(&mut self, _set: usize, ways: &[WayInfo]) -> Option<usize> {
        let eligible: Vec<usize> = (0..ways.len()).filter(|&w| ways[w].eligible).collect();
        if eligible.is_empty() {
            return None;
        }
        Some(eligible[(self.next() as usize) % eligible.len()])
    }
}
