//! Per-address transaction state.
//!
//! The request at the head of a MAF entry owns a [`Transaction`]: the snoops it
//! is waiting for, the data it has collected, and the state it granted. Snoop
//! fan-out is either one multicast to the whole target set or a sequence of
//! single probes ordered by distance from the requester.

use std::collections::VecDeque;

use crate::common::{NodeId, Result};
use crate::message::{Destination, MessageKind, Transport};
use crate::state::{CacheState, SharingVector};

/// How snoops are sent to a target set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fanout {
    /// One message addressed to every target.
    Multicast,
    /// One target at a time, closest to the requester first.
    Sequential,
}

/// Result of integrating one snoop response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Other responses are still outstanding.
    Waiting,
    /// Send this probe to the next sequential target.
    Probe(Transport),
    /// Every required response has arrived.
    Done,
    /// The responder was not being waited for.
    Unexpected,
}

/// State of the operation at the head of a MAF entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// The request as issued (after any Upgrade-to-Write conversion).
    pub request: Transport,
    /// Nodes snooped whose response is outstanding.
    pub awaiting: SharingVector,
    /// Sequential targets not yet probed.
    pub queued: VecDeque<NodeId>,
    /// Snoop kind being sent.
    pub snoop: Option<MessageKind>,
    /// Stop probing once a response carries data.
    pub stop_on_data: bool,
    /// A snoop response supplied the data.
    pub data_from_snoop: bool,
    /// Supplied data was dirty.
    pub data_dirty: bool,
    /// Read of a migratory block: the old owner is invalidated and Modified is granted.
    pub migratory_read: bool,
    /// State granted in the reply, once sent.
    pub grant: Option<CacheState>,
}

impl Transaction {
    /// Opens a transaction for `request`.
    pub fn new(request: Transport, width: usize) -> Self {
        Self {
            request,
            awaiting: SharingVector::new(width),
            queued: VecDeque::new(),
            snoop: None,
            stop_on_data: false,
            data_from_snoop: false,
            data_dirty: false,
            migratory_read: false,
            grant: None,
        }
    }

    /// Requesting node.
    pub const fn requester(&self) -> NodeId {
        self.request.requester
    }

    /// Effective request kind.
    pub const fn kind(&self) -> MessageKind {
        self.request.kind
    }

    /// Returns true while snoop responses are outstanding or probes remain.
    pub fn snooping(&self) -> bool {
        !self.awaiting.is_empty() || !self.queued.is_empty()
    }

    /// Returns true once the reply has been sent.
    pub const fn replied(&self) -> bool {
        self.grant.is_some()
    }

    /// Starts snooping `targets`.
    ///
    /// # Arguments
    ///
    /// * `snoop` - Snoop kind to send.
    /// * `targets` - Nodes to snoop; must not be empty.
    /// * `fanout` - Multicast or sequential delivery.
    /// * `stop_on_data` - End a sequential walk at the first response with data.
    ///
    /// # Returns
    ///
    /// The first snoop message, or `None` if `targets` is empty.
    pub fn start_snoops(
        &mut self,
        snoop: MessageKind,
        targets: &SharingVector,
        fanout: Fanout,
        stop_on_data: bool,
    ) -> Result<Option<Transport>> {
        self.snoop = Some(snoop);
        self.stop_on_data = stop_on_data;
        if targets.is_empty() {
            return Ok(None);
        }
        if fanout == Fanout::Multicast || targets.one_sharer() {
            self.awaiting = targets.clone();
            return Ok(Some(self.snoop_to(snoop, targets)));
        }
        let mut remaining = targets.clone();
        let anchor = self.requester().min(remaining.width() - 1);
        while let Some(next) = remaining.closest_sharer(anchor)? {
            self.queued.push_back(next);
            remaining.remove_sharer(next)?;
        }
        self.next_probe()
    }

    fn snoop_to(&self, snoop: MessageKind, targets: &SharingVector) -> Transport {
        let destination = match targets.first_sharer() {
            Some(only) if targets.one_sharer() => Destination::Node(only),
            _ => Destination::Multicast(targets.clone()),
        };
        Transport::outbound(snoop, self.request.address, self.requester(), destination)
    }

    fn next_probe(&mut self) -> Result<Option<Transport>> {
        let (Some(snoop), Some(node)) = (self.snoop, self.queued.pop_front()) else {
            return Ok(None);
        };
        self.awaiting.add_sharer(node)?;
        Ok(Some(Transport::outbound(snoop, self.request.address, self.requester(), Destination::Node(node))))
    }

    /// Integrates the response of `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - Responding node.
    /// * `has_data` - Response carries a data block.
    /// * `dirty` - The data is dirty.
    pub fn record_ack(&mut self, source: NodeId, has_data: bool, dirty: bool) -> Result<AckOutcome> {
        if !self.awaiting.is_sharer(source)? {
            return Ok(AckOutcome::Unexpected);
        }
        self.awaiting.remove_sharer(source)?;
        if has_data {
            self.data_from_snoop = true;
            self.data_dirty |= dirty;
        }
        if !self.awaiting.is_empty() {
            return Ok(AckOutcome::Waiting);
        }
        if self.stop_on_data && self.data_from_snoop {
            self.queued.clear();
            return Ok(AckOutcome::Done);
        }
        Ok(self.next_probe()?.map_or(AckOutcome::Done, AckOutcome::Probe))
    }
}
