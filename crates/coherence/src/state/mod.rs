//! Coherence state lattice.
//!
//! This module defines the per-block coherence vocabulary used by the directory. It provides:
//! 1. **States:** The MOESI family plus `InvalidPresent` and `Forward`.
//! 2. **Modifiers:** Orthogonal `protected`, `locked` and `prefetched` bits.
//! 3. **Permission Order:** A total write-permission rank for deciding whether a
//!    request can be satisfied by the state a node already holds.
//! 4. **Sharer Sets:** The [`SharingVector`] bitset (see [`sharing`]).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sharer bitset recording which nodes hold a copy of a block.
pub mod sharing;

pub use sharing::SharingVector;

/// Coherence state of a block.
///
/// The directory records the state of the block in the caches it tracks. The
/// permission rank is `Modified > Owned > Exclusive > Shared = Forward >
/// Invalid = InvalidPresent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheState {
    /// Dirty, exclusive copy held by one node.
    Modified,
    /// Dirty copy held by one node that is responsible for write-back.
    Owned,
    /// Clean, exclusive copy held by one node.
    Exclusive,
    /// Clean, read-only copy; any number of holders.
    Shared,
    /// No valid copy.
    #[default]
    Invalid,
    /// Tag present but data invalid.
    InvalidPresent,
    /// Clean read-only copy designated to forward data.
    Forward,
}

impl CacheState {
    /// Returns the write-permission rank of this state.
    ///
    /// # Returns
    ///
    /// `4` for Modified down to `0` for the invalid states. `Shared` and
    /// `Forward` share rank `1`.
    pub const fn permission(self) -> u8 {
        match self {
            Self::Modified => 4,
            Self::Owned => 3,
            Self::Exclusive => 2,
            Self::Shared | Self::Forward => 1,
            Self::Invalid | Self::InvalidPresent => 0,
        }
    }

    /// Compares two states by write permission.
    pub fn permission_cmp(self, other: Self) -> Ordering {
        self.permission().cmp(&other.permission())
    }

    /// Returns true if holding `self` is enough to satisfy an access that needs `required`.
    pub const fn satisfies(self, required: Self) -> bool {
        self.permission() >= required.permission()
    }

    /// Returns true for states that name a single owning node.
    pub const fn is_owner_state(self) -> bool {
        matches!(self, Self::Modified | Self::Owned | Self::Exclusive)
    }

    /// Returns true for states holding valid data.
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid | Self::InvalidPresent)
    }

    /// Returns true if the holder must write the block back on eviction.
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Modified | Self::Owned)
    }

    /// Returns the full state name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Modified => "Modified",
            Self::Owned => "Owned",
            Self::Exclusive => "Exclusive",
            Self::Shared => "Shared",
            Self::Invalid => "Invalid",
            Self::InvalidPresent => "InvalidPresent",
            Self::Forward => "Forward",
        }
    }

    /// Returns the one-letter abbreviation used in compact traces.
    pub const fn abbrev(self) -> char {
        match self {
            Self::Modified => 'M',
            Self::Owned => 'O',
            Self::Exclusive => 'E',
            Self::Shared => 'S',
            Self::Invalid => 'I',
            Self::InvalidPresent => 'P',
            Self::Forward => 'F',
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Modifier bits carried alongside a [`CacheState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    /// Entry is held by an in-flight transaction and may not be replaced.
    #[serde(default)]
    pub protected: bool,
    /// Entry is locked by an atomic sequence.
    #[serde(default)]
    pub locked: bool,
    /// Entry was filled by a prefetch.
    #[serde(default)]
    pub prefetched: bool,
}

impl Modifiers {
    /// Returns true if no modifier bit is set.
    pub const fn is_empty(self) -> bool {
        !(self.protected || self.locked || self.prefetched)
    }
}

impl fmt::Display for Modifiers {
    /// Renders the set bits as `+protected+locked+prefetched`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protected {
            f.write_str("+protected")?;
        }
        if self.locked {
            f.write_str("+locked")?;
        }
        if self.prefetched {
            f.write_str("+prefetched")?;
        }
        Ok(())
    }
}
