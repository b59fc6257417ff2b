//! Directory storage.
//!
//! A directory maps a block address to its coherence entry. Four storage
//! variants are provided, selected by the `DirectoryType` option:
//! 1. **`infinite`:** Exact per-block map that never replaces anything.
//! 2. **`std`:** Exact, set-associative, with a replacement policy and protected entries.
//! 3. **`region`:** Set-associative entries covering several blocks, with a region summary.
//! 4. **`tagless`:** Hash-bucketed sharer filter with false positives only.
//!
//! The variants form a closed [`Directory`] sum type. Names are resolved through a
//! [`DirectoryRegistry`] built once when the controller is constructed.

/// Exact per-block entries.
pub mod entry;

/// Set-index computation.
pub mod geometry;

/// Unbounded exact directory.
pub mod infinite;

/// Region directory.
pub mod region;

/// Replacement policies for set-associative variants.
pub mod replacement;

/// Checkpoint records.
pub mod snapshot;

/// Set-associative exact directory.
pub mod standard;

/// Tagless sharer filter.
pub mod tagless;

use std::collections::BTreeMap;
use std::fmt;

pub use entry::DirectoryEntry;
pub use geometry::SetIndexer;
pub use infinite::InfiniteDirectory;
pub use region::{RegionDirectory, RegionEntry, RegionLookup};
pub use snapshot::{BankSnapshot, DirectorySnapshot, EntrySnapshot};
pub use standard::StdDirectory;
pub use tagless::TaglessDirectory;

use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::config::{BankInfo, DirectoryParams, ReplacementPolicy};
use crate::state::{CacheState, SharingVector};

/// Outcome of making room for an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// The address has an entry. `victims` are replaced entries that still had
    /// sharers and must be drained through the Evict Buffer.
    Installed {
        /// Replaced entries with sharers.
        victims: Vec<DirectoryEntry>,
    },
    /// Every candidate entry is protected; retry after a transaction in the set completes.
    SetFull,
}

/// What a lookup learned about an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupResult {
    /// Looked-up block address.
    pub address: MemoryAddress,
    /// Exact entry, for exact and region storage.
    pub entry: Option<DirectoryEntry>,
    /// Superset of the sharers, for tagless storage.
    pub approximate: Option<SharingVector>,
}

impl LookupResult {
    /// Returns true if exact storage holds an entry for the address.
    pub const fn found(&self) -> bool {
        self.entry.is_some()
    }

    /// Returns the exact state, `Invalid` when absent or approximate.
    pub fn state(&self) -> CacheState {
        self.entry.as_ref().map_or(CacheState::Invalid, |e| e.state)
    }

    /// Returns the owning node, if the state names one.
    pub fn owner(&self) -> Option<NodeId> {
        self.entry.as_ref().and_then(|e| e.owner)
    }

    /// Returns the sharers (exact) or the candidate sharers (approximate).
    pub fn sharers(&self) -> Option<&SharingVector> {
        self.entry.as_ref().map(|e| &e.sharers).or(self.approximate.as_ref())
    }

    /// Renders the state for diagnostics.
    pub fn describe(&self) -> String {
        match (&self.entry, &self.approximate) {
            (Some(e), _) => e.to_string(),
            (None, Some(s)) => format!("Approximate{s}"),
            (None, None) => "NotPresent".to_string(),
        }
    }
}

/// Directory storage of one bank.
#[derive(Debug)]
pub enum Directory {
    /// Unbounded exact directory.
    Infinite(InfiniteDirectory),
    /// Set-associative exact directory.
    Std(StdDirectory),
    /// Region directory.
    Region(RegionDirectory),
    /// Tagless sharer filter.
    Tagless(TaglessDirectory),
}

impl Directory {
    /// Returns the registered name of the variant.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Infinite(_) => "infinite",
            Self::Std(_) => "std",
            Self::Region(_) => "region",
            Self::Tagless(_) => "tagless",
        }
    }

    /// Returns true for variants that keep exact per-block entries.
    pub const fn is_exact(&self) -> bool {
        !matches!(self, Self::Tagless(_))
    }

    /// Looks up `address`, updating replacement state.
    pub fn lookup(&mut self, address: MemoryAddress) -> LookupResult {
        let (entry, approximate) = match self {
            Self::Infinite(d) => (d.lookup(address).cloned(), None),
            Self::Std(d) => (d.lookup(address).cloned(), None),
            Self::Region(d) => (d.lookup(address).cloned(), None),
            Self::Tagless(d) => (None, Some(d.lookup(address))),
        };
        LookupResult { address, entry, approximate }
    }

    /// Returns the exact entry for `address` without side effects.
    pub fn peek(&self, address: MemoryAddress) -> Option<&DirectoryEntry> {
        match self {
            Self::Infinite(d) => d.lookup(address),
            Self::Std(d) => d.peek(address),
            Self::Region(d) => d.peek(address),
            Self::Tagless(_) => None,
        }
    }

    /// Applies `f` to the exact entry for `address`.
    ///
    /// # Returns
    ///
    /// `None` if there is no exact entry for the address.
    pub fn update<R>(&mut self, address: MemoryAddress, f: impl FnOnce(&mut DirectoryEntry) -> R) -> Option<R> {
        match self {
            Self::Infinite(d) => d.entry_mut(address).map(f),
            Self::Std(d) => d.entry_mut(address).map(f),
            Self::Region(d) => d.update(address, f),
            Self::Tagless(_) => None,
        }
    }

    /// Sets or clears the protected bit of the entry for `address`.
    pub fn set_protected(&mut self, address: MemoryAddress, protected: bool) {
        let _ = self.update(address, |e| e.modifiers.protected = protected);
    }

    /// Makes room for `address` in exact storage.
    pub fn allocate(&mut self, address: MemoryAddress) -> Result<Allocation> {
        match self {
            Self::Infinite(d) => {
                d.allocate(address);
                Ok(Allocation::Installed { victims: Vec::new() })
            }
            Self::Std(d) => Ok(d.allocate(address)),
            Self::Region(d) => Ok(d.allocate(address)),
            Self::Tagless(_) => Err(DirectoryError::Unsupported { operation: "allocate", directory: "tagless" }),
        }
    }

    /// Records `node` as a holder of `address` in approximate storage.
    pub fn insert_approximate(&mut self, address: MemoryAddress, node: NodeId) -> Result<()> {
        match self {
            Self::Tagless(d) => d.insert(address, node),
            _ => Err(DirectoryError::Unsupported { operation: "insert_approximate", directory: self.name() }),
        }
    }

    /// Returns true if a transaction finishing on `a` may free a slot usable by `b`.
    pub fn same_set(&self, a: MemoryAddress, b: MemoryAddress) -> bool {
        match self {
            Self::Std(d) => d.same_set(a, b),
            Self::Region(d) => d.same_set(a, b),
            Self::Infinite(_) | Self::Tagless(_) => false,
        }
    }

    /// Blocks covered by one entry.
    pub const fn blocks_per_region(&self) -> usize {
        match self {
            Self::Region(d) => d.blocks_per_region(),
            _ => 1,
        }
    }

    /// Returns the address of the entry covering `address`.
    pub const fn get_region(&self, address: MemoryAddress) -> MemoryAddress {
        match self {
            Self::Region(d) => d.get_region(address),
            _ => address,
        }
    }

    /// Evict Buffer slots a single allocation may need.
    pub const fn eb_requirement(&self) -> usize {
        match self {
            Self::Infinite(_) | Self::Tagless(_) => 0,
            Self::Std(_) => 1,
            Self::Region(d) => d.blocks_per_region(),
        }
    }

    /// Number of occupied entries, when storage can count them.
    pub fn occupancy(&self) -> Option<usize> {
        match self {
            Self::Infinite(d) => Some(d.len()),
            Self::Std(d) => Some(d.len()),
            Self::Region(d) => Some(d.len()),
            Self::Tagless(_) => None,
        }
    }

    /// Returns every exact block entry.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        match self {
            Self::Infinite(d) => d.entries().cloned().collect(),
            Self::Std(d) => d.entries().cloned().collect(),
            Self::Region(d) => d.regions().flat_map(|r| r.blocks.iter().cloned()).collect(),
            Self::Tagless(_) => Vec::new(),
        }
    }

    /// Captures the storage contents.
    pub fn save_state(&self) -> DirectorySnapshot {
        match self {
            Self::Infinite(d) => d.save_state(),
            Self::Std(d) => d.save_state(),
            Self::Region(d) => d.save_state(),
            Self::Tagless(d) => d.save_state(),
        }
    }

    /// Replaces the storage contents with `snapshot`.
    pub fn load_state(&mut self, bank: usize, snapshot: &DirectorySnapshot) -> Result<()> {
        match self {
            Self::Infinite(d) => d.load_state(bank, snapshot),
            Self::Std(d) => d.load_state(bank, snapshot),
            Self::Region(d) => d.load_state(bank, snapshot),
            Self::Tagless(d) => d.load_state(bank, snapshot),
        }
    }
}

/// Builds a directory for one bank from its parsed parameters.
pub type DirectoryConstructor = Box<dyn Fn(&BankInfo, &DirectoryParams) -> Result<Directory> + Send + Sync>;

/// Name-to-constructor map for directory storage.
pub struct DirectoryRegistry {
    constructors: BTreeMap<String, DirectoryConstructor>,
}

impl fmt::Debug for DirectoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRegistry").field("names", &self.names()).finish()
    }
}

impl Default for DirectoryRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl DirectoryRegistry {
    /// Creates a registry with no entries.
    pub const fn empty() -> Self {
        Self { constructors: BTreeMap::new() }
    }

    /// Creates a registry holding `infinite`, `std`, `region` and `tagless`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("infinite", Box::new(build_infinite));
        registry.register("std", Box::new(build_std));
        registry.register("region", Box::new(build_region));
        registry.register("tagless", Box::new(build_tagless));
        registry
    }

    /// Registers `constructor` under `name` (case-insensitive), replacing any previous one.
    pub fn register(&mut self, name: &str, constructor: DirectoryConstructor) {
        let _ = self.constructors.insert(name.to_ascii_lowercase(), constructor);
    }

    /// Returns the registered names.
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds the directory registered as `name`.
    ///
    /// # Arguments
    ///
    /// * `name` - `DirectoryType` option value.
    /// * `info` - Bank geometry.
    /// * `params` - Parsed `DirectoryConfig` option.
    pub fn build(&self, name: &str, info: &BankInfo, params: &DirectoryParams) -> Result<Directory> {
        let constructor = self
            .constructors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| DirectoryError::UnknownDirectoryType(name.to_string()))?;
        constructor(info, params)
    }
}

mod defaults {
    pub const SETS: usize = 1024;
    pub const ASSOC: usize = 16;
    pub const REGION_BLOCKS: u64 = 4;
    pub const TAGLESS_SETS: usize = 256;
    pub const BUCKETS: usize = 64;
    pub const HASHES: usize = 2;
}

const SET_ASSOC_KEYS: &[&str] = &["sets", "total_sets", "assoc", "repl", "skew"];

/// Sets per bank from `sets` or `total_sets`.
fn sets_per_bank(info: &BankInfo, params: &DirectoryParams, default: usize) -> Result<usize> {
    let sets = match (params.power_of_two("sets")?, params.power_of_two("total_sets")?) {
        (Some(_), Some(_)) => {
            return Err(DirectoryError::InvalidConfig("give either sets or total_sets, not both".to_string()));
        }
        (Some(sets), None) => sets,
        (None, Some(total)) => total / info.banks,
        (None, None) => default,
    };
    if sets == 0 {
        return Err(DirectoryError::InvalidConfig(format!(
            "total_sets must be at least the bank count ({})",
            info.banks
        )));
    }
    Ok(sets)
}

fn build_infinite(info: &BankInfo, params: &DirectoryParams) -> Result<Directory> {
    params.ensure_only("infinite", &[])?;
    Ok(Directory::Infinite(InfiniteDirectory::new(info.cores)))
}

fn build_std(info: &BankInfo, params: &DirectoryParams) -> Result<Directory> {
    params.ensure_only("std", SET_ASSOC_KEYS)?;
    let sets = sets_per_bank(info, params, defaults::SETS)?;
    let assoc = params.usize("assoc")?.unwrap_or(defaults::ASSOC).max(1);
    let repl = params.get("repl").map_or(Ok(ReplacementPolicy::default()), ReplacementPolicy::from_name)?;
    let skew = params.flag("skew")?.unwrap_or(false);
    let indexer = SetIndexer::new(info.block_size, info.banks, info.interleaving, sets, skew);
    Ok(Directory::Std(StdDirectory::new(indexer, assoc, info.cores, replacement::build(repl, sets, assoc))))
}

fn build_region(info: &BankInfo, params: &DirectoryParams) -> Result<Directory> {
    let mut keys = SET_ASSOC_KEYS.to_vec();
    keys.push("region_size");
    params.ensure_only("region", &keys)?;
    let sets = sets_per_bank(info, params, defaults::SETS)?;
    let assoc = params.usize("assoc")?.unwrap_or(defaults::ASSOC).max(1);
    let repl = params.get("repl").map_or(Ok(ReplacementPolicy::default()), ReplacementPolicy::from_name)?;
    let skew = params.flag("skew")?.unwrap_or(false);
    let region_size = params
        .power_of_two("region_size")?
        .map_or(defaults::REGION_BLOCKS * info.block_size, |r| r as u64);
    if region_size < info.block_size {
        return Err(DirectoryError::InvalidConfig(format!(
            "region_size {region_size} is smaller than the block size {}",
            info.block_size
        )));
    }
    let indexer = SetIndexer::new(region_size, info.banks, info.interleaving, sets, skew);
    Ok(Directory::Region(RegionDirectory::new(
        indexer,
        assoc,
        info.cores,
        info.block_size,
        region_size,
        replacement::build(repl, sets, assoc),
    )))
}

fn build_tagless(info: &BankInfo, params: &DirectoryParams) -> Result<Directory> {
    params.ensure_only("tagless", &["sets", "total_sets", "buckets", "hashes"])?;
    let sets = sets_per_bank(info, params, defaults::TAGLESS_SETS)?;
    let buckets = params.usize("buckets")?.unwrap_or(defaults::BUCKETS);
    let hashes = params.usize("hashes")?.unwrap_or(defaults::HASHES);
    if buckets == 0 || hashes == 0 {
        return Err(DirectoryError::InvalidConfig("tagless buckets and hashes must be at least 1".to_string()));
    }
    let indexer = SetIndexer::new(info.block_size, info.banks, info.interleaving, sets, false);
    Ok(Directory::Tagless(TaglessDirectory::new(indexer, buckets, hashes, info.block_size, info.cores)))
}
