//! Configuration for the directory coherence engine.
//!
//! This module defines the option surface recognized by the banked controller. It provides:
//! 1. **Defaults:** Latencies, queue and buffer capacities, and the default policy and directory.
//! 2. **Structures:** `DirectoryConfig`, deserialized from JSON with PascalCase option names.
//! 3. **Directory Parameters:** The `key=value:key=value` grammar of the `DirectoryConfig` string.
//! 4. **Validation:** Power-of-two and bounds checks performed before any bank is built.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::common::{DirectoryError, MAX_NUM_SHARERS, Result};

/// Default configuration constants for the directory engine.
mod defaults {
    /// Cycles from issue until a process's outputs become visible.
    pub const DIR_LATENCY: u64 = 3;

    /// Minimum cycles between two issues into a bank pipeline.
    pub const DIR_ISSUE_LATENCY: u64 = 1;

    /// Capacity of every bank input and output queue.
    pub const QUEUE_SIZE: usize = 8;

    /// Number of operations the Miss Address File can hold.
    pub const MAF_SIZE: usize = 32;

    /// Number of entries in the Evict Buffer.
    pub const EVICT_BUFFER_SIZE: usize = 16;

    /// Protocol policy used when none is named.
    pub const POLICY: &str = "InclusiveMOESI";

    /// Directory storage used when none is named.
    pub const DIRECTORY_TYPE: &str = "infinite";

    /// Number of directory banks.
    pub const BANKS: usize = 1;

    /// Bytes of contiguous address space mapped to one bank before moving to the next.
    pub const INTERLEAVING: u64 = 64;

    /// Number of cache nodes tracked by every sharing vector.
    pub const CORES: usize = 16;

    /// Coherence block size in bytes.
    pub const BLOCK_SIZE: u64 = crate::common::DEFAULT_BLOCK_SIZE;
}

/// Directory engine configuration.
///
/// Every field is optional in JSON; missing fields take the values of the
/// private `defaults` module.
///
/// # Example
///
/// ```
/// use dirsim_core::config::DirectoryConfig;
///
/// let json = r#"{
///     "Banks": 4,
///     "Interleaving": 64,
///     "LocalDirectory": true,
///     "DirectoryType": "std",
///     "DirectoryConfig": "total_sets=1024:assoc=16",
///     "Cores": 8
/// }"#;
///
/// let config: DirectoryConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.banks, 4);
/// assert_eq!(config.maf_size, 32);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryConfig {
    /// Pipeline latency of a bank in cycles.
    #[serde(default = "DirectoryConfig::default_dir_latency")]
    pub dir_latency: u64,

    /// Minimum cycles between issues into a bank pipeline.
    #[serde(default = "DirectoryConfig::default_dir_issue_latency")]
    pub dir_issue_latency: u64,

    /// Capacity of each bank and port queue.
    #[serde(default = "DirectoryConfig::default_queue_size")]
    pub queue_size: usize,

    /// Capacity of each bank's Miss Address File.
    #[serde(rename = "MAFSize", default = "DirectoryConfig::default_maf_size")]
    pub maf_size: usize,

    /// Capacity of each bank's Evict Buffer.
    #[serde(default = "DirectoryConfig::default_evict_buffer_size")]
    pub evict_buffer_size: usize,

    /// Registered protocol policy name.
    #[serde(default = "DirectoryConfig::default_policy")]
    pub directory_policy: String,

    /// Registered directory storage name.
    #[serde(default = "DirectoryConfig::default_directory_type")]
    pub directory_type: String,

    /// Storage parameters in `key=value:key=value` form.
    #[serde(default)]
    pub directory_config: String,

    /// Number of banks.
    #[serde(default = "DirectoryConfig::default_banks")]
    pub banks: usize,

    /// Bank interleaving granularity in bytes.
    #[serde(default = "DirectoryConfig::default_interleaving")]
    pub interleaving: u64,

    /// Second shift folded into the bank index; `0` disables skewing.
    #[serde(default)]
    pub skew_shift: u32,

    /// Route incoming messages by address and outgoing ones to the requester's port.
    #[serde(default)]
    pub local_directory: bool,

    /// Number of cache nodes tracked by the sharing vectors.
    #[serde(default = "DirectoryConfig::default_cores")]
    pub cores: usize,

    /// Coherence block size in bytes.
    #[serde(default = "DirectoryConfig::default_block_size")]
    pub block_size: u64,

    /// Send one multicast snoop per transaction instead of probing sharers one at a time.
    #[serde(default = "DirectoryConfig::default_always_multicast")]
    pub always_multicast: bool,

    /// Detect migratory sharing and grant Modified on reads of migratory blocks.
    #[serde(default)]
    pub migratory_optimization: bool,
}

impl DirectoryConfig {
    fn default_dir_latency() -> u64 {
        defaults::DIR_LATENCY
    }

    fn default_dir_issue_latency() -> u64 {
        defaults::DIR_ISSUE_LATENCY
    }

    fn default_queue_size() -> usize {
        defaults::QUEUE_SIZE
    }

    fn default_maf_size() -> usize {
        defaults::MAF_SIZE
    }

    fn default_evict_buffer_size() -> usize {
        defaults::EVICT_BUFFER_SIZE
    }

    fn default_policy() -> String {
        defaults::POLICY.to_string()
    }

    fn default_directory_type() -> String {
        defaults::DIRECTORY_TYPE.to_string()
    }

    fn default_banks() -> usize {
        defaults::BANKS
    }

    fn default_interleaving() -> u64 {
        defaults::INTERLEAVING
    }

    fn default_cores() -> usize {
        defaults::CORES
    }

    fn default_block_size() -> u64 {
        defaults::BLOCK_SIZE
    }

    fn default_always_multicast() -> bool {
        true
    }

    /// Checks that every value is in range and that the parameter string parses.
    ///
    /// # Returns
    ///
    /// `InvalidConfig` naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DirectoryError::InvalidConfig(msg));
        if self.cores == 0 || self.cores > MAX_NUM_SHARERS {
            return invalid(format!("Cores must be in 1..={MAX_NUM_SHARERS}, got {}", self.cores));
        }
        if !self.block_size.is_power_of_two() {
            return invalid(format!("BlockSize must be a power of two, got {}", self.block_size));
        }
        if self.banks == 0 || !self.banks.is_power_of_two() {
            return invalid(format!("Banks must be a power of two, got {}", self.banks));
        }
        if !self.interleaving.is_power_of_two() || self.interleaving < self.block_size {
            return invalid(format!(
                "Interleaving must be a power of two no smaller than BlockSize, got {}",
                self.interleaving
            ));
        }
        if self.skew_shift >= u64::BITS {
            return invalid(format!("SkewShift must be below 64, got {}", self.skew_shift));
        }
        // A request can emit a write-back and a memory store in the same step.
        if self.queue_size < 2 {
            return invalid(format!("QueueSize must be at least 2, got {}", self.queue_size));
        }
        if self.dir_issue_latency == 0 {
            return invalid("DirIssueLatency must be at least 1".to_string());
        }
        for (name, value) in [
            ("QueueSize", self.queue_size),
            ("MAFSize", self.maf_size),
            ("EvictBufferSize", self.evict_buffer_size),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }
        let _ = DirectoryParams::parse(&self.directory_config)?;
        Ok(())
    }

    /// Returns log2 of the block size.
    pub const fn block_bits(&self) -> u32 {
        self.block_size.trailing_zeros()
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            dir_latency: defaults::DIR_LATENCY,
            dir_issue_latency: defaults::DIR_ISSUE_LATENCY,
            queue_size: defaults::QUEUE_SIZE,
            maf_size: defaults::MAF_SIZE,
            evict_buffer_size: defaults::EVICT_BUFFER_SIZE,
            directory_policy: defaults::POLICY.to_string(),
            directory_type: defaults::DIRECTORY_TYPE.to_string(),
            directory_config: String::new(),
            banks: defaults::BANKS,
            interleaving: defaults::INTERLEAVING,
            skew_shift: 0,
            local_directory: false,
            cores: defaults::CORES,
            block_size: defaults::BLOCK_SIZE,
            always_multicast: true,
            migratory_optimization: false,
        }
    }
}

/// Per-bank view of the configuration handed to directory and policy constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    /// Bank index.
    pub bank: usize,
    /// Bank name used in logs.
    pub name: String,
    /// Sharer width.
    pub cores: usize,
    /// Block size in bytes.
    pub block_size: u64,
    /// Total number of banks.
    pub banks: usize,
    /// Bank interleaving granularity in bytes.
    pub interleaving: u64,
    /// Miss Address File capacity.
    pub maf_size: usize,
    /// Evict Buffer capacity.
    pub evict_buffer_size: usize,
    /// Multicast snoop fan-out.
    pub always_multicast: bool,
    /// Migratory-sharing detection.
    pub migratory_optimization: bool,
}

impl DirectoryConfig {
    /// Returns the view of this configuration seen by bank `bank`.
    pub fn bank_info(&self, bank: usize) -> BankInfo {
        BankInfo {
            bank,
            name: format!("directory-bank{bank}"),
            cores: self.cores,
            block_size: self.block_size,
            banks: self.banks,
            interleaving: self.interleaving,
            maf_size: self.maf_size,
            evict_buffer_size: self.evict_buffer_size,
            always_multicast: self.always_multicast,
            migratory_optimization: self.migratory_optimization,
        }
    }
}

/// Victim selection strategy for set-associative directories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Evict the unprotected entry with the fewest sharers.
    #[default]
    FewestSharers,
    /// Evict the least recently touched unprotected entry.
    Lru,
    /// Evict unprotected entries in installation order.
    Fifo,
    /// Evict a pseudo-randomly chosen unprotected entry.
    Random,
}

impl ReplacementPolicy {
    /// Parses the `repl` parameter value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fewest_sharers" | "fewest" => Ok(Self::FewestSharers),
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            other => Err(DirectoryError::InvalidConfig(format!("unknown replacement policy '{other}'"))),
        }
    }
}

/// Parsed `DirectoryConfig` parameter string.
///
/// The grammar is `key=value` pairs separated by `:`; an empty string yields
/// an empty parameter set. Keys are case-insensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryParams {
    values: BTreeMap<String, String>,
}

impl DirectoryParams {
    /// Parses a parameter string.
    ///
    /// # Arguments
    ///
    /// * `text` - The raw `DirectoryConfig` option, for example `sets=1024:assoc=16`.
    ///
    /// # Returns
    ///
    /// The parameter set, or `InvalidConfig` for a pair without `=`, an empty
    /// key, or a repeated key.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for pair in text.split(':').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(DirectoryError::InvalidConfig(format!(
                    "directory parameter '{pair}' is not key=value"
                )));
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(DirectoryError::InvalidConfig(format!(
                    "directory parameter '{pair}' has an empty key"
                )));
            }
            if values.insert(key.clone(), value.trim().to_string()).is_some() {
                return Err(DirectoryError::InvalidConfig(format!(
                    "directory parameter '{key}' given twice"
                )));
            }
        }
        Ok(Self { values })
    }

    /// Rejects any key not in `known`.
    ///
    /// # Arguments
    ///
    /// * `directory` - Directory type name for the diagnostic.
    /// * `known` - Keys the directory type understands.
    pub fn ensure_only(&self, directory: &str, known: &[&str]) -> Result<()> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(key) => Err(DirectoryError::InvalidConfig(format!(
                "'{key}' is not a {directory} directory parameter (expected one of {})",
                known.join(", ")
            ))),
            None => Ok(()),
        }
    }

    /// Returns the raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns `key` parsed as an unsigned integer.
    pub fn usize(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    DirectoryError::InvalidConfig(format!("'{key}={v}' is not an unsigned integer"))
                })
            })
            .transpose()
    }

    /// Returns `key` parsed as an unsigned integer that must be a power of two.
    pub fn power_of_two(&self, key: &str) -> Result<Option<usize>> {
        match self.usize(key)? {
            Some(v) if !v.is_power_of_two() => Err(DirectoryError::InvalidConfig(format!(
                "'{key}' must be a power of two, got {v}"
            ))),
            other => Ok(other),
        }
    }

    /// Returns `key` parsed as a boolean (`true`/`false`/`1`/`0`).
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(DirectoryError::InvalidConfig(format!("'{key}={v}' is not a boolean"))),
            })
            .transpose()
    }
}
