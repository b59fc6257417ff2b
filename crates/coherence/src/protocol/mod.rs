//! Coherence protocol policies.
//!
//! A policy is the state machine of one bank. It consumes the bank's
//! directory, Miss Address File and Evict Buffer (bundled in [`BankContext`])
//! and turns every scheduled process into directory updates plus outbound
//! messages. This module provides:
//! 1. **Dispatch:** [`DirectoryPolicy`], a closed set of policies selected by name.
//! 2. **Registry:** [`PolicyRegistry`], mapping `DirectoryPolicy` option values to constructors.
//! 3. **Shared Mechanics:** Request admission, completion checks, reply and write-back construction.
//!
//! Every handler returns `Ok(Some(process))` when the process continues
//! through the bank pipeline with its outbox filled, or `Ok(None)` when the
//! process was handed to the MAF.

/// Inclusive MOESI policy over exact directories.
pub mod moesi;

/// Policy over the tagless sharer filter.
pub mod tagless;

use std::collections::BTreeMap;
use std::fmt;

pub use moesi::MoesiPolicy;
pub use tagless::TaglessPolicy;

use crate::common::{DirectoryError, MemoryAddress, NodeId, Result};
use crate::config::BankInfo;
use crate::directory::Directory;
use crate::evict_buffer::EvictBuffer;
use crate::maf::{MafInsert, MissAddressFile};
use crate::message::{Destination, MessageKind, Transport};
use crate::process::{Outbox, ProcessAction, ProcessEntry, ProcessType};
use crate::state::{CacheState, SharingVector};
use crate::transaction::{Fanout, Transaction};

/// Structures owned by one bank and mutated only by its policy.
#[derive(Debug)]
pub struct BankContext {
    /// Bank geometry and options.
    pub info: BankInfo,
    /// Directory storage.
    pub directory: Directory,
    /// Per-address serialization.
    pub maf: MissAddressFile,
    /// Replaced entries draining their sharers.
    pub eb: EvictBuffer,
}

impl BankContext {
    /// Bundles a freshly built directory with empty MAF and Evict Buffer.
    pub fn new(info: BankInfo, directory: Directory) -> Self {
        let maf = MissAddressFile::new(info.bank, info.maf_size);
        let eb = EvictBuffer::new(info.bank, info.evict_buffer_size);
        Self { info, directory, maf, eb }
    }

    /// Renders what the bank knows about `address` for diagnostics.
    pub fn describe(&self, address: MemoryAddress) -> String {
        if let Some(evicting) = self.eb.find(address) {
            return format!("Evicting{}", evicting.entry);
        }
        match &self.directory {
            Directory::Tagless(d) => format!("Approximate{}", d.lookup(address)),
            other => other.peek(address).map_or_else(|| "NotPresent".to_string(), ToString::to_string),
        }
    }

    /// Builds the fatal error for an impossible message in the current state.
    pub fn violation(&self, address: MemoryAddress, message: impl Into<String>) -> DirectoryError {
        DirectoryError::ProtocolViolation {
            bank: self.info.bank,
            address,
            state: self.describe(address),
            message: message.into(),
        }
    }

    /// Snoop fan-out configured for this bank.
    pub const fn fanout(&self) -> Fanout {
        if self.info.always_multicast { Fanout::Multicast } else { Fanout::Sequential }
    }
}

/// Protocol state machine of a bank.
#[derive(Debug)]
pub enum DirectoryPolicy {
    /// Inclusive MOESI over exact storage.
    InclusiveMoesi(MoesiPolicy),
    /// Broadcast-style protocol over the tagless filter.
    Tagless(TaglessPolicy),
}

impl DirectoryPolicy {
    /// Registered name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InclusiveMoesi(_) => "InclusiveMOESI",
            Self::Tagless(_) => "Tagless",
        }
    }

    /// Routes `process` to the handler for its type.
    pub fn handle(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        match process.kind {
            ProcessType::Request => self.handle_request(ctx, process),
            ProcessType::WakeMaf => self.handle_wake_maf(ctx, process),
            ProcessType::Snoop => self.handle_snoop(ctx, process),
            ProcessType::Reply => self.handle_reply(ctx, process),
            ProcessType::Evict => self.handle_evict(ctx, process),
            ProcessType::IdleWork => self.handle_idle_work(ctx, process),
        }
    }

    /// Admits a processor request into the MAF and services it if nothing is in flight.
    pub fn handle_request(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        if !process.transport.kind.is_request() {
            let message = format!("{} on the request channel", process.transport.kind);
            return Err(ctx.violation(process.transport.address, message));
        }
        process.action = ProcessAction::Queued;
        match ctx.maf.insert(process)? {
            MafInsert::First(process) => self.dispatch(ctx, process),
            MafInsert::Queued => Ok(None),
        }
    }

    /// Services a request woken from the MAF.
    pub fn handle_wake_maf(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        self.dispatch(ctx, process)
    }

    fn dispatch(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        match self {
            Self::InclusiveMoesi(p) => p.dispatch(ctx, process),
            Self::Tagless(p) => p.dispatch(ctx, process),
        }
    }

    /// Integrates an eviction or a snoop response.
    pub fn handle_snoop(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        match self {
            Self::InclusiveMoesi(p) => p.handle_snoop(ctx, process),
            Self::Tagless(p) => p.handle_snoop(ctx, process),
        }
    }

    /// Closes a transaction on the requester's completion and commits its directory state.
    pub fn handle_reply(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let transaction = close_transaction(ctx, &process.transport)?;
        match self {
            Self::InclusiveMoesi(p) => p.commit(ctx, &transaction)?,
            Self::Tagless(p) => p.commit(ctx, &transaction)?,
        }
        self.wake_mafs(ctx, transaction.request.address);
        process.action = ProcessAction::Complete;
        Ok(Some(process))
    }

    /// Runs a mandatory Evict Buffer drain step.
    pub fn handle_evict(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        match self {
            Self::InclusiveMoesi(p) => p.drain(ctx, process),
            Self::Tagless(_) => Err(ctx.violation(process.transport.address, "tagless banks have no Evict Buffer")),
        }
    }

    /// Runs opportunistic background work.
    pub fn handle_idle_work(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        self.handle_evict(ctx, process)
    }

    /// Returns true if background work could be scheduled.
    pub fn has_idle_work_available(&self, ctx: &BankContext) -> bool {
        match self {
            Self::InclusiveMoesi(_) => ctx.eb.needs_invalidation(),
            Self::Tagless(_) => false,
        }
    }

    /// Returns true if the Evict Buffer must drain before more requests fit.
    pub fn evict_work_required(&self, ctx: &BankContext) -> bool {
        match self {
            Self::InclusiveMoesi(_) => {
                let needed = ctx.directory.eb_requirement().max(1);
                ctx.eb.needs_invalidation() && ctx.eb.free_slots() + ctx.eb.invalidating_count() < needed
            }
            Self::Tagless(_) => false,
        }
    }

    /// Builds the next Evict Buffer BackInvalidate, if any entry is waiting for one.
    pub fn evict_block_transport(&self, ctx: &BankContext) -> Option<Transport> {
        match self {
            Self::InclusiveMoesi(_) => ctx.eb.evict_block_transport(),
            Self::Tagless(_) => None,
        }
    }

    /// Returns true if servicing `transport` cannot overflow the Evict Buffer.
    pub fn eb_has_space(&self, ctx: &BankContext, transport: &Transport) -> bool {
        match self {
            Self::InclusiveMoesi(_) if transport.kind.is_request() => {
                ctx.eb.has_space(ctx.directory.eb_requirement())
            }
            _ => true,
        }
    }

    /// Returns true if no transaction or eviction is outstanding.
    pub fn is_quiesced(&self, ctx: &BankContext) -> bool {
        ctx.maf.is_empty() && ctx.eb.is_empty()
    }

    /// Releases what a finished transaction on `address` held and wakes the requests it blocked.
    pub fn wake_mafs(&self, ctx: &mut BankContext, address: MemoryAddress) {
        if let Self::InclusiveMoesi(p) = self {
            p.release(ctx, address);
        }
    }
}

/// Builds a policy for one bank.
pub type PolicyConstructor = Box<dyn Fn(&BankInfo, &Directory) -> Result<DirectoryPolicy> + Send + Sync>;

/// Name-to-constructor map for protocol policies.
pub struct PolicyRegistry {
    constructors: BTreeMap<String, PolicyConstructor>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry").field("names", &self.constructors.keys()).finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl PolicyRegistry {
    /// Creates a registry holding `InclusiveMOESI` and `Tagless`.
    pub fn with_builtin() -> Self {
        let mut registry = Self { constructors: BTreeMap::new() };
        registry.register(
            "InclusiveMOESI",
            Box::new(|info, directory| {
                if !directory.is_exact() {
                    return Err(DirectoryError::InvalidConfig(format!(
                        "InclusiveMOESI needs exact directory storage, got {}",
                        directory.name()
                    )));
                }
                Ok(DirectoryPolicy::InclusiveMoesi(MoesiPolicy::new(info)))
            }),
        );
        registry.register(
            "Tagless",
            Box::new(|_, directory| {
                if directory.is_exact() {
                    return Err(DirectoryError::InvalidConfig(format!(
                        "Tagless policy needs tagless directory storage, got {}",
                        directory.name()
                    )));
                }
                Ok(DirectoryPolicy::Tagless(TaglessPolicy))
            }),
        );
        registry
    }

    /// Registers `constructor` under `name` (case-insensitive).
    pub fn register(&mut self, name: &str, constructor: PolicyConstructor) {
        let _ = self.constructors.insert(name.to_ascii_lowercase(), constructor);
    }

    /// Builds the policy registered as `name` for a bank using `directory`.
    pub fn build(&self, name: &str, info: &BankInfo, directory: &Directory) -> Result<DirectoryPolicy> {
        let constructor = self
            .constructors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| DirectoryError::UnknownPolicy(name.to_string()))?;
        constructor(info, directory)
    }
}

/// Validates a completion against the open transaction and closes it.
fn close_transaction(ctx: &mut BankContext, completion: &Transport) -> Result<Transaction> {
    let address = completion.address;
    if !completion.kind.is_completion() {
        return Err(ctx.violation(address, format!("{} on the reply channel", completion.kind)));
    }
    let expected = ctx.maf.transaction(address).is_some_and(|txn| {
        txn.replied()
            && txn.requester() == completion.source
            && txn.kind().completion_kind() == Some(completion.kind)
    });
    if !expected {
        return Err(ctx.violation(
            address,
            format!("{} from node {} matches no replied transaction", completion.kind, completion.source),
        ));
    }
    ctx.maf.complete(address)
}

/// Sends `snoop` to `targets` or, when there are none, replies at once.
///
/// # Arguments
///
/// * `grant` - Computes the granted state once no snoop is needed.
pub(crate) fn launch(
    ctx: &mut BankContext,
    mut process: ProcessEntry,
    mut txn: Transaction,
    snoop: MessageKind,
    targets: &SharingVector,
    stop_on_data: bool,
    grant: impl FnOnce(&Transaction) -> Result<CacheState>,
) -> Result<Option<ProcessEntry>> {
    let address = txn.request.address;
    if let Some(first) = txn.start_snoops(snoop, targets, ctx.fanout(), stop_on_data)? {
        process.outbox.snoops.push(first);
        process.action = ProcessAction::SnoopAndWait;
    } else {
        let state = grant(&txn)?;
        reply(&mut txn, state, &mut process.outbox);
        process.action = ProcessAction::Reply;
    }
    ctx.maf.begin(address, txn)?;
    Ok(Some(process))
}

/// Fills the outbox with the reply that ends `txn`, plus memory traffic for
/// non-allocating stores.
pub(crate) fn reply(txn: &mut Transaction, grant: CacheState, outbox: &mut Outbox) {
    let address = txn.request.address;
    let requester = txn.requester();
    txn.grant = Some(grant);
    let to_requester = |kind| Transport::outbound(kind, address, requester, Destination::Node(requester));
    let message = match txn.kind() {
        MessageKind::NonAllocatingStore => {
            if txn.data_dirty {
                outbox.requests.push(writeback(address, requester));
            }
            outbox.requests.push(
                Transport::outbound(MessageKind::MemoryStore, address, requester, Destination::Memory).with_data(true),
            );
            to_requester(MessageKind::NasReply)
        }
        MessageKind::Upgrade => to_requester(MessageKind::UpgradeReply),
        kind => {
            let reply_kind = kind.reply_kind().unwrap_or(MessageKind::ReadReply);
            to_requester(reply_kind).with_data(txn.data_dirty && grant == CacheState::Modified)
        }
    };
    outbox.replies.push(message.with_grant(grant));
}

/// Dirty data from `node` on its way to memory.
pub(crate) fn writeback(address: MemoryAddress, node: NodeId) -> Transport {
    Transport::outbound(MessageKind::Writeback, address, node, Destination::Memory).with_data(true)
}

/// Acknowledges a cache eviction, forwarding dirty data to memory.
pub(crate) fn acknowledge_eviction(process: &mut ProcessEntry) {
    let t = &process.transport;
    if t.kind == MessageKind::EvictDirty {
        process.outbox.requests.push(writeback(t.address, t.source));
        process.action = ProcessAction::Forward;
    } else {
        process.action = ProcessAction::Reply;
    }
    process
        .outbox
        .replies
        .push(Transport::outbound(MessageKind::EvictAck, t.address, t.source, Destination::Node(t.source)));
}
