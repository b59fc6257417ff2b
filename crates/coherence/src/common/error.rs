//! Fatal error definitions.
//!
//! Every condition that indicates a coherence-logic bug or a broken caller
//! contract is reported through [`DirectoryError`]. This module provides:
//! 1. **Protocol Violations:** Unexpected messages for the current directory state.
//! 2. **Contract Violations:** Capacity overruns after an availability check was skipped.
//! 3. **Configuration and Snapshot Errors:** Bad option strings and mismatched checkpoints.
//!
//! Backpressure (MAF full, Evict Buffer full, queue full) is never an error; those
//! conditions are surfaced as boolean availability checks on the owning structure.

use thiserror::Error;

use super::addr::MemoryAddress;

/// A fatal condition raised by the coherence engine.
///
/// A run that observes one of these must stop: the directory state can no
/// longer be trusted.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A sharer index fell outside the configured sharing-vector width.
    #[error("sharer index {index} out of range for a {width}-wide sharing vector")]
    SharerOutOfRange {
        /// The offending index.
        index: usize,
        /// The configured width of the vector.
        width: usize,
    },

    /// A sharing vector wider than 64 bits was asked for its packed form.
    #[error("a {width}-wide sharing vector does not fit in a packed 64-bit word")]
    PackOverflow {
        /// The configured width of the vector.
        width: usize,
    },

    /// A message arrived that the current directory state cannot accept.
    #[error("bank {bank}: protocol violation at {address} in state {state}: {message}")]
    ProtocolViolation {
        /// Bank that detected the violation.
        bank: usize,
        /// Block address of the offending message.
        address: MemoryAddress,
        /// Rendered directory state at the point of violation.
        state: String,
        /// What went wrong.
        message: String,
    },

    /// A snapshot does not match the shape of the bank loading it.
    #[error("bank {bank}: snapshot mismatch: {reason}")]
    SnapshotMismatch {
        /// Bank being restored.
        bank: usize,
        /// Description of the mismatch.
        reason: String,
    },

    /// A bounded structure was filled past its capacity.
    #[error("bank {bank}: {structure} capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// Name of the structure (`MAF`, `EvictBuffer`).
        structure: &'static str,
        /// Owning bank.
        bank: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// A message was pushed into a queue without checking availability.
    #[error("{queue} queue overflow")]
    QueueFull {
        /// Name of the queue.
        queue: &'static str,
    },

    /// The configured protocol policy name is not registered.
    #[error("unknown directory policy '{0}'")]
    UnknownPolicy(String),

    /// The configured directory type name is not registered.
    #[error("unknown directory type '{0}'")]
    UnknownDirectoryType(String),

    /// A configuration value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation is not available on the selected directory variant.
    #[error("{operation} is not supported by the {directory} directory")]
    Unsupported {
        /// Requested operation.
        operation: &'static str,
        /// Directory variant name.
        directory: &'static str,
    },

    /// Reading or writing a snapshot file failed.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot file could not be encoded or decoded.
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the coherence engine.
pub type Result<T> = std::result::Result<T, DirectoryError>;
