//! Sharer bitset.
//!
//! A [`SharingVector`] records which nodes hold a copy of a block. Its width is
//! fixed when it is created (the configured core count, at most
//! [`MAX_NUM_SHARERS`]) and every index access is range checked against it.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::common::constants::SHARER_WORD_BITS;
use crate::common::{DirectoryError, MAX_NUM_SHARERS, NodeId, Result};

/// Fixed-width set of node indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharingVector {
    width: usize,
    words: Vec<u64>,
}

impl SharingVector {
    /// Creates an empty vector able to hold `width` sharers.
    ///
    /// # Arguments
    ///
    /// * `width` - Number of trackable nodes, `1..=MAX_NUM_SHARERS`.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or exceeds [`MAX_NUM_SHARERS`]; configuration
    /// validation rejects such widths before any vector is built.
    pub fn new(width: usize) -> Self {
        assert!(
            width > 0 && width <= MAX_NUM_SHARERS,
            "sharing vector width {width} outside 1..={MAX_NUM_SHARERS}"
        );
        Self { width, words: vec![0; width.div_ceil(SHARER_WORD_BITS)] }
    }

    /// Creates a vector with exactly one sharer set.
    pub fn with_sharer(width: usize, index: NodeId) -> Result<Self> {
        let mut v = Self::new(width);
        v.add_sharer(index)?;
        Ok(v)
    }

    /// Rebuilds a vector from its storage words.
    ///
    /// # Returns
    ///
    /// The vector, `SharerOutOfRange` if a bit beyond `width` is set, or
    /// `InvalidConfig` if the word count is wrong.
    pub fn from_words(width: usize, words: &[u64]) -> Result<Self> {
        let mut v = Self::new(width);
        if words.len() != v.words.len() {
            return Err(DirectoryError::InvalidConfig(format!(
                "{} sharer words supplied for a {width}-wide vector",
                words.len()
            )));
        }
        v.words.copy_from_slice(words);
        if let Some(bad) = v.iter().find(|&i| i >= width) {
            return Err(DirectoryError::SharerOutOfRange { index: bad, width });
        }
        Ok(v)
    }

    /// Returns the storage words, least significant sharer first.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Returns the configured width.
    pub const fn width(&self) -> usize {
        self.width
    }

    #[inline]
    const fn check(&self, index: NodeId) -> Result<()> {
        if index < self.width {
            Ok(())
        } else {
            Err(DirectoryError::SharerOutOfRange { index, width: self.width })
        }
    }

    /// Marks `index` as a sharer.
    pub fn add_sharer(&mut self, index: NodeId) -> Result<()> {
        self.check(index)?;
        self.words[index / SHARER_WORD_BITS] |= 1 << (index % SHARER_WORD_BITS);
        Ok(())
    }

    /// Clears `index` from the set.
    pub fn remove_sharer(&mut self, index: NodeId) -> Result<()> {
        self.check(index)?;
        self.words[index / SHARER_WORD_BITS] &= !(1 << (index % SHARER_WORD_BITS));
        Ok(())
    }

    /// Returns true if `index` is a sharer.
    pub fn is_sharer(&self, index: NodeId) -> Result<bool> {
        self.check(index)?;
        Ok(self.words[index / SHARER_WORD_BITS] & (1 << (index % SHARER_WORD_BITS)) != 0)
    }

    /// Replaces the whole set with `{index}`.
    pub fn set_only(&mut self, index: NodeId) -> Result<()> {
        self.check(index)?;
        self.clear();
        self.add_sharer(index)
    }

    /// Removes every sharer.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Returns the number of sharers.
    pub fn count_sharers(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no node is a sharer.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns true if exactly one node is a sharer.
    pub fn one_sharer(&self) -> bool {
        self.count_sharers() == 1
    }

    /// Returns the lowest-numbered sharer.
    pub fn first_sharer(&self) -> Option<NodeId> {
        self.iter().next()
    }

    /// Returns the sharer nearest to `index`.
    ///
    /// Sharers above and below `index` are searched outward; when both sides are
    /// equally distant the higher one wins. `index` itself is returned only when
    /// it is the sole candidate.
    ///
    /// # Arguments
    ///
    /// * `index` - The node the result should be close to (usually the requester).
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the vector is empty.
    pub fn closest_sharer(&self, index: NodeId) -> Result<Option<NodeId>> {
        self.check(index)?;
        let above = self.iter().find(|&i| i > index);
        let below = self.iter().take_while(|&i| i < index).last();
        Ok(match (above, below) {
            (Some(a), Some(b)) => Some(if index - b < a - index { b } else { a }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => self.is_sharer(index)?.then_some(index),
        })
    }

    /// Iterates over the sharers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            let mut rest = bits;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(w * SHARER_WORD_BITS + bit)
            })
        })
    }

    /// Returns the sharers as an ascending list.
    pub fn to_list(&self) -> Vec<NodeId> {
        self.iter().collect()
    }

    /// Returns a copy of this set without `index`.
    pub fn without(&self, index: NodeId) -> Result<Self> {
        let mut v = self.clone();
        v.remove_sharer(index)?;
        Ok(v)
    }

    /// Packs the set into one 64-bit word.
    ///
    /// # Returns
    ///
    /// The packed word, or `PackOverflow` if the vector is wider than 64.
    pub fn pack(&self) -> Result<u64> {
        if self.width > SHARER_WORD_BITS {
            return Err(DirectoryError::PackOverflow { width: self.width });
        }
        Ok(self.words[0])
    }

    /// Rebuilds a vector from a packed word.
    pub fn unpack(width: usize, bits: u64) -> Result<Self> {
        if width > SHARER_WORD_BITS {
            return Err(DirectoryError::PackOverflow { width });
        }
        Self::from_words(width, &[bits])
    }
}

impl BitAnd for &SharingVector {
    type Output = SharingVector;

    /// Intersection. The result takes the narrower width.
    fn bitand(self, rhs: Self) -> SharingVector {
        let (narrow, wide) = if self.width <= rhs.width { (self, rhs) } else { (rhs, self) };
        let mut out = narrow.clone();
        out &= wide;
        out
    }
}

impl BitAndAssign<&Self> for SharingVector {
    fn bitand_assign(&mut self, rhs: &Self) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= rhs.words.get(i).copied().unwrap_or(0);
        }
    }
}

impl BitOrAssign<&Self> for SharingVector {
    /// Union. Bits of `rhs` beyond this vector's width are dropped.
    fn bitor_assign(&mut self, rhs: &Self) {
        for (w, r) in self.words.iter_mut().zip(&rhs.words) {
            *w |= r;
        }
        let tail = self.width % SHARER_WORD_BITS;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1 << tail) - 1;
        }
    }
}

impl fmt::Display for SharingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (n, i) in self.iter().enumerate() {
            if n > 0 {
                f.write_str(",")?;
            }
            write!(f, "{i}")?;
        }
        f.write_str("}")
    }
}
