//! In-flight process contexts.
//!
//! A [`ProcessEntry`] is created when a bank schedules a message (or an
//! internal work item) and lives until its outputs are delivered, unless the
//! policy parks it in the Miss Address File, in which case the MAF owns it
//! until it is woken.

use std::fmt;

use crate::message::Transport;

/// Why a process was scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessType {
    /// Redispatch of a request woken from the MAF.
    WakeMaf,
    /// Requester completion from ReplyIn.
    Reply,
    /// Eviction or snoop response from SnoopIn.
    Snoop,
    /// Processor request from RequestIn.
    Request,
    /// Mandatory Evict Buffer drain.
    Evict,
    /// Opportunistic background work.
    IdleWork,
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the policy decided to do with a process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProcessAction {
    /// Nothing to send.
    #[default]
    NoAction,
    /// Replied to the requester.
    Reply,
    /// Sent snoops and waits for their acknowledgments.
    SnoopAndWait,
    /// Forwarded traffic to memory.
    Forward,
    /// Queued behind an in-flight operation on the same address.
    Queued,
    /// Parked until an entry of the same directory set is released.
    StallOnSet,
    /// Parked until the address leaves the Evict Buffer.
    StallOnEvict,
    /// Closed a transaction.
    Complete,
}

impl ProcessAction {
    /// Returns true if the process now belongs to the MAF.
    pub const fn is_parked(self) -> bool {
        matches!(self, Self::Queued | Self::StallOnSet | Self::StallOnEvict)
    }
}

/// Messages a process emits once it leaves the bank pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outbox {
    /// Snoops for SnoopOut.
    pub snoops: Vec<Transport>,
    /// Replies for ReplyOut.
    pub replies: Vec<Transport>,
    /// Memory traffic for RequestOut.
    pub requests: Vec<Transport>,
}

impl Outbox {
    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.snoops.is_empty() && self.replies.is_empty() && self.requests.is_empty()
    }
}

/// Scheduled unit of bank work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Scheduling class.
    pub kind: ProcessType,
    /// Message being processed.
    pub transport: Transport,
    /// Decision taken by the policy.
    pub action: ProcessAction,
    /// Messages produced.
    pub outbox: Outbox,
}

impl ProcessEntry {
    /// Creates a process for `transport`.
    pub fn new(kind: ProcessType, transport: Transport) -> Self {
        Self { kind, transport, action: ProcessAction::NoAction, outbox: Outbox::default() }
    }
}

impl fmt::Display for ProcessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.transport)
    }
}
