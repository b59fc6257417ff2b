//! Exact per-block directory entries.

use std::fmt;

use crate::common::{MemoryAddress, NodeId, Result};
use crate::state::{CacheState, Modifiers, SharingVector};

/// Coherence record for one block.
///
/// The entry keeps its state and sharer set consistent through its mutators:
/// an owner state (`Modified`, `Owned`, `Exclusive`) has exactly one sharer which
/// is the owner, `Shared` has at least one sharer and no owner, and `Invalid`
/// has none.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Block address.
    pub tag: MemoryAddress,
    /// State of the block in the caches.
    pub state: CacheState,
    /// Protected/locked/prefetched bits.
    pub modifiers: Modifiers,
    /// Nodes holding a copy.
    pub sharers: SharingVector,
    /// Owning node for owner states.
    pub owner: Option<NodeId>,
    /// Block shows a migratory read-modify-write pattern.
    pub migratory: bool,
    /// Last node granted write permission.
    pub last_writer: Option<NodeId>,
}

impl DirectoryEntry {
    /// Creates an Invalid entry for `tag` with a `width`-wide sharer set.
    pub fn new(tag: MemoryAddress, width: usize) -> Self {
        Self {
            tag,
            state: CacheState::Invalid,
            modifiers: Modifiers::default(),
            sharers: SharingVector::new(width),
            owner: None,
            migratory: false,
            last_writer: None,
        }
    }

    /// Returns true if an in-flight transaction holds the entry.
    pub const fn is_protected(&self) -> bool {
        self.modifiers.protected
    }

    /// Returns true if the entry can be dropped without notifying anyone.
    pub fn is_idle(&self) -> bool {
        self.sharers.is_empty() && !self.modifiers.protected
    }

    /// Makes `node` the single owner in `state`.
    pub fn set_owner(&mut self, node: NodeId, state: CacheState) -> Result<()> {
        self.sharers.set_only(node)?;
        self.state = state;
        self.owner = Some(node);
        Ok(())
    }

    /// Adds `node` as a Shared holder. A previous owner stays on as a sharer.
    pub fn add_shared(&mut self, node: NodeId) -> Result<()> {
        self.sharers.add_sharer(node)?;
        self.state = CacheState::Shared;
        self.owner = None;
        Ok(())
    }

    /// Turns an owner state into Shared, keeping every sharer.
    pub fn downgrade_owner(&mut self) {
        if self.state.is_owner_state() {
            self.state = if self.sharers.is_empty() { CacheState::Invalid } else { CacheState::Shared };
            self.owner = None;
        }
    }

    /// Removes `node` from the sharers and repairs the state.
    ///
    /// # Returns
    ///
    /// Whether `node` was a sharer.
    pub fn remove_sharer(&mut self, node: NodeId) -> Result<bool> {
        let was = self.sharers.is_sharer(node)?;
        self.sharers.remove_sharer(node)?;
        if self.sharers.is_empty() {
            self.state = CacheState::Invalid;
            self.owner = None;
        } else if self.owner == Some(node) {
            self.state = CacheState::Shared;
            self.owner = None;
        }
        Ok(was)
    }

    /// Drops every sharer.
    pub fn invalidate(&mut self) {
        self.sharers.clear();
        self.state = CacheState::Invalid;
        self.owner = None;
    }

    /// Describes how the entry breaks the state/sharer invariant, if it does.
    pub fn invariant_violation(&self) -> Option<String> {
        let count = self.sharers.count_sharers();
        match self.state {
            s if s.is_owner_state() => {
                if count != 1 {
                    Some(format!("{s} with {count} sharers"))
                } else if self.owner != self.sharers.first_sharer() {
                    Some(format!("{s} owner {:?} is not the sharer {}", self.owner, self.sharers))
                } else {
                    None
                }
            }
            CacheState::Shared | CacheState::Forward if count == 0 => {
                Some(format!("{} with no sharers", self.state))
            }
            CacheState::Shared | CacheState::Forward if self.owner.is_some() => {
                Some(format!("{} with owner {:?}", self.state, self.owner))
            }
            CacheState::Invalid | CacheState::InvalidPresent if count != 0 => {
                Some(format!("{} with sharers {}", self.state, self.sharers))
            }
            _ => None,
        }
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.state, self.sharers, self.modifiers)?;
        if self.migratory {
            f.write_str("+migratory")?;
        }
        Ok(())
    }
}
