//! Coherence messages.
//!
//! Every message entering or leaving a bank is a [`Transport`]. This module provides:
//! 1. **Message Kinds:** Requests, evictions, snoops, snoop responses, replies,
//!    completions and memory traffic.
//! 2. **Channels:** The fixed assignment of each kind to the Request, Snoop or Reply queues.
//! 3. **Destinations:** Single node, multicast sharer set, or the next memory level.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{MemoryAddress, NodeId};
use crate::state::{CacheState, SharingVector};

/// Operation carried by a [`Transport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Read miss asking for a readable copy.
    Read,
    /// Instruction fetch miss; always satisfied with a Shared copy.
    Fetch,
    /// Write miss asking for a writable copy with data.
    Write,
    /// Write hit on a Shared copy asking for write permission only.
    Upgrade,
    /// Store that bypasses the requester's cache and goes to memory.
    NonAllocatingStore,
    /// Cache dropped a clean Shared copy.
    EvictClean,
    /// Cache dropped a clean Exclusive copy.
    EvictWritable,
    /// Cache dropped a dirty copy; carries data.
    EvictDirty,
    /// Directory asks the owner to supply data and fall back to Shared.
    Downgrade,
    /// Directory asks a sharer to drop its copy on behalf of a requester.
    Invalidate,
    /// Directory asks a sharer to drop its copy because the entry is being replaced.
    BackInvalidate,
    /// Response to `Downgrade`.
    DowngradeAck,
    /// Response to `Invalidate` or `BackInvalidate`.
    InvalidateAck,
    /// Reply to `Read`.
    ReadReply,
    /// Reply to `Fetch`.
    FetchReply,
    /// Reply to `Write`.
    WriteReply,
    /// Reply to `Upgrade`.
    UpgradeReply,
    /// Reply to `NonAllocatingStore`.
    NasReply,
    /// Reply to any eviction.
    EvictAck,
    /// Requester installed the `ReadReply`.
    ReadAck,
    /// Requester installed the `FetchReply`.
    FetchAck,
    /// Requester installed the `WriteReply`.
    WriteAck,
    /// Requester installed the `UpgradeReply`.
    UpgradeAck,
    /// Requester observed the `NasReply`.
    NasAck,
    /// Dirty data on its way to memory.
    Writeback,
    /// Non-allocating store forwarded to memory.
    MemoryStore,
}

/// Queue class a message travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Processor requests inbound, memory traffic outbound.
    Request,
    /// Evictions and snoop responses inbound, snoops outbound.
    Snoop,
    /// Completions inbound, replies outbound.
    Reply,
}

impl MessageKind {
    /// Returns true for processor-side requests that take a MAF slot.
    pub const fn is_request(self) -> bool {
        matches!(self, Self::Read | Self::Fetch | Self::Write | Self::Upgrade | Self::NonAllocatingStore)
    }

    /// Returns true for cache-initiated evictions.
    pub const fn is_evict(self) -> bool {
        matches!(self, Self::EvictClean | Self::EvictWritable | Self::EvictDirty)
    }

    /// Returns true for snoops issued by the directory.
    pub const fn is_snoop(self) -> bool {
        matches!(self, Self::Downgrade | Self::Invalidate | Self::BackInvalidate)
    }

    /// Returns true for responses to directory snoops.
    pub const fn is_snoop_response(self) -> bool {
        matches!(self, Self::DowngradeAck | Self::InvalidateAck)
    }

    /// Returns true for requester completions that close a transaction.
    pub const fn is_completion(self) -> bool {
        matches!(self, Self::ReadAck | Self::FetchAck | Self::WriteAck | Self::UpgradeAck | Self::NasAck)
    }

    /// Returns true for directory replies.
    pub const fn is_reply(self) -> bool {
        matches!(
            self,
            Self::ReadReply
                | Self::FetchReply
                | Self::WriteReply
                | Self::UpgradeReply
                | Self::NasReply
                | Self::EvictAck
        )
    }

    /// Returns the channel this kind is carried on.
    pub const fn channel(self) -> Channel {
        if self.is_request() || matches!(self, Self::Writeback | Self::MemoryStore) {
            Channel::Request
        } else if self.is_evict() || self.is_snoop() || self.is_snoop_response() {
            Channel::Snoop
        } else {
            Channel::Reply
        }
    }

    /// Returns the reply kind answering this request.
    pub const fn reply_kind(self) -> Option<Self> {
        match self {
            Self::Read => Some(Self::ReadReply),
            Self::Fetch => Some(Self::FetchReply),
            Self::Write => Some(Self::WriteReply),
            Self::Upgrade => Some(Self::UpgradeReply),
            Self::NonAllocatingStore => Some(Self::NasReply),
            Self::EvictClean | Self::EvictWritable | Self::EvictDirty => Some(Self::EvictAck),
            _ => None,
        }
    }

    /// Returns the completion kind the requester sends after this reply.
    pub const fn completion_kind(self) -> Option<Self> {
        match self {
            Self::Read | Self::ReadReply => Some(Self::ReadAck),
            Self::Fetch | Self::FetchReply => Some(Self::FetchAck),
            Self::Write | Self::WriteReply => Some(Self::WriteAck),
            Self::Upgrade | Self::UpgradeReply => Some(Self::UpgradeAck),
            Self::NonAllocatingStore | Self::NasReply => Some(Self::NasAck),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where an outbound message is headed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// The directory bank (inbound traffic).
    Directory,
    /// A single cache node.
    Node(NodeId),
    /// Every node in the set; one logical copy per member.
    Multicast(SharingVector),
    /// The next memory level.
    Memory,
}

/// A coherence message.
///
/// `requester` always names the node whose request opened the transaction;
/// `source` names the node that sent an inbound message, which differs from
/// `requester` only for snoop responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    /// Operation.
    pub kind: MessageKind,
    /// Block address.
    pub address: MemoryAddress,
    /// Node whose request this message belongs to.
    pub requester: NodeId,
    /// Node that sent the message (inbound) or the requester (outbound).
    pub source: NodeId,
    /// Delivery target.
    pub destination: Destination,
    /// Message carries a data block.
    #[serde(default)]
    pub has_data: bool,
    /// Carried data differs from memory.
    #[serde(default)]
    pub dirty: bool,
    /// State granted to the requester by a reply.
    #[serde(default)]
    pub grant: Option<CacheState>,
}

impl Transport {
    /// Creates an inbound message sent by `node` on its own behalf.
    ///
    /// # Arguments
    ///
    /// * `kind` - Request, eviction or completion kind.
    /// * `address` - Target address.
    /// * `node` - Sending node, also the requester.
    pub const fn new(kind: MessageKind, address: MemoryAddress, node: NodeId) -> Self {
        Self {
            kind,
            address,
            requester: node,
            source: node,
            destination: Destination::Directory,
            has_data: matches!(kind, MessageKind::EvictDirty | MessageKind::NonAllocatingStore),
            dirty: matches!(kind, MessageKind::EvictDirty | MessageKind::NonAllocatingStore),
            grant: None,
        }
    }

    /// Creates a snoop response from `responder` for a transaction opened by `requester`.
    ///
    /// # Arguments
    ///
    /// * `kind` - `DowngradeAck` or `InvalidateAck`.
    /// * `address` - Snooped address.
    /// * `requester` - Requester named in the snoop.
    /// * `responder` - Node answering the snoop.
    /// * `has_data` - Responder held a valid copy and supplies it.
    /// * `dirty` - The supplied copy was modified.
    pub const fn snoop_response(
        kind: MessageKind,
        address: MemoryAddress,
        requester: NodeId,
        responder: NodeId,
        has_data: bool,
        dirty: bool,
    ) -> Self {
        Self {
            kind,
            address,
            requester,
            source: responder,
            destination: Destination::Directory,
            has_data,
            dirty: has_data && dirty,
            grant: None,
        }
    }

    /// Creates an outbound message from the directory.
    pub const fn outbound(
        kind: MessageKind,
        address: MemoryAddress,
        requester: NodeId,
        destination: Destination,
    ) -> Self {
        Self {
            kind,
            address,
            requester,
            source: requester,
            destination,
            has_data: false,
            dirty: false,
            grant: None,
        }
    }

    /// Marks the message as carrying data.
    #[must_use]
    pub fn with_data(mut self, dirty: bool) -> Self {
        self.has_data = true;
        self.dirty = dirty;
        self
    }

    /// Sets the granted state.
    #[must_use]
    pub fn with_grant(mut self, grant: CacheState) -> Self {
        self.grant = Some(grant);
        self
    }

    /// Returns the channel this message travels on.
    pub const fn channel(&self) -> Channel {
        self.kind.channel()
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} req={}", self.kind, self.address, self.requester)?;
        if self.source != self.requester {
            write!(f, " src={}", self.source)?;
        }
        match &self.destination {
            Destination::Directory => {}
            Destination::Node(n) => write!(f, " -> {n}")?,
            Destination::Multicast(set) => write!(f, " -> {set}")?,
            Destination::Memory => f.write_str(" -> mem")?,
        }
        if self.has_data {
            f.write_str(if self.dirty { " +dirty-data" } else { " +data" })?;
        }
        if let Some(grant) = self.grant {
            write!(f, " grant={grant}")?;
        }
        Ok(())
    }
}
