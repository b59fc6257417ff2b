//! Inclusive MOESI.
//!
//! The directory tracks every cached block exactly. Requests are serviced as follows:
//! 1. **Read/Fetch:** A remote owner is downgraded (its data is forwarded and a dirty copy
//!    is written back); otherwise the reply goes out at once, Exclusive when nobody else
//!    holds the block. Fetch always receives Shared.
//! 2. **Write/Upgrade:** Every other sharer is invalidated before Modified is granted.
//!    An Upgrade from a node that no longer holds the block is serviced as a Write.
//! 3. **NonAllocatingStore:** Every sharer is invalidated, the store goes to memory and
//!    the entry ends Invalid.
//! 4. **Migratory Blocks:** With migratory detection enabled, a Read of a migratory block
//!    invalidates the owner and grants Modified directly.
//!
//! Directory state is committed when the requester's completion arrives; until then the
//! entry is protected from replacement.

use tracing::debug;

use super::{BankContext, acknowledge_eviction, launch, reply, writeback};
use crate::common::{MemoryAddress, NodeId, Result};
use crate::config::BankInfo;
use crate::directory::{Allocation, DirectoryEntry};
use crate::evict_buffer::EvictProgress;
use crate::maf::BlockReason;
use crate::message::MessageKind;
use crate::process::{ProcessAction, ProcessEntry};
use crate::state::{CacheState, SharingVector};
use crate::transaction::{AckOutcome, Transaction};

/// Inclusive MOESI state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoesiPolicy {
    migratory: bool,
}

impl MoesiPolicy {
    /// Creates the policy for one bank.
    pub const fn new(info: &BankInfo) -> Self {
        Self { migratory: info.migratory_optimization }
    }

    /// State granted to the requester of `txn`, given the block's current sharers.
    fn grant(txn: &Transaction, sharers: &SharingVector) -> Result<CacheState> {
        Ok(match txn.kind() {
            MessageKind::Read if txn.migratory_read => CacheState::Modified,
            MessageKind::Read if sharers.without(txn.requester())?.is_empty() => CacheState::Exclusive,
            MessageKind::Read | MessageKind::Fetch => CacheState::Shared,
            MessageKind::Write | MessageKind::Upgrade => CacheState::Modified,
            _ => CacheState::Invalid,
        })
    }

    pub(super) fn dispatch(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let address = process.transport.address;
        let evicting = ctx.eb.find(address).map(|e| e.invalidating);
        if evicting == Some(true) {
            process.action = ProcessAction::StallOnEvict;
            ctx.maf.park(process, BlockReason::Evict)?;
            return Ok(None);
        }

        if ctx.directory.peek(address).is_none() {
            match ctx.directory.allocate(address)? {
                Allocation::SetFull => {
                    debug!(bank = ctx.info.bank, %address, "no unprotected way, stalling on set");
                    process.action = ProcessAction::StallOnSet;
                    ctx.maf.park(process, BlockReason::Set)?;
                    return Ok(None);
                }
                Allocation::Installed { victims } => {
                    for victim in victims {
                        ctx.eb.allocate(victim)?;
                    }
                }
            }
        }
        if evicting == Some(false)
            && let Some(saved) = ctx.eb.remove(address)
        {
            debug!(bank = ctx.info.bank, %address, entry = %saved, "reinstalled from Evict Buffer");
            let _ = ctx.directory.update(address, |e| *e = saved);
        }

        ctx.directory.set_protected(address, true);
        let Some(entry) = ctx.directory.lookup(address).entry else {
            return Err(ctx.violation(address, "entry missing after allocation"));
        };

        let requester = process.transport.requester;
        let mut request = process.transport.clone();
        if request.kind == MessageKind::Upgrade && !entry.sharers.is_sharer(requester)? {
            debug!(bank = ctx.info.bank, %address, requester, "upgrade from non-sharer serviced as write");
            request.kind = MessageKind::Write;
        }
        let txn = Transaction::new(request, ctx.info.cores);

        match txn.kind() {
            MessageKind::Read | MessageKind::Fetch => self.read(ctx, process, txn, &entry),
            MessageKind::Write | MessageKind::Upgrade => {
                self.detect_migratory(ctx, requester, &entry)?;
                let targets = entry.sharers.without(requester)?;
                launch(ctx, process, txn, MessageKind::Invalidate, &targets, false, |_| Ok(CacheState::Modified))
            }
            MessageKind::NonAllocatingStore => {
                launch(ctx, process, txn, MessageKind::Invalidate, &entry.sharers, false, |_| Ok(CacheState::Invalid))
            }
            other => Err(ctx.violation(address, format!("{other} is not a request"))),
        }
    }

    fn read(
        &self,
        ctx: &mut BankContext,
        process: ProcessEntry,
        mut txn: Transaction,
        entry: &DirectoryEntry,
    ) -> Result<Option<ProcessEntry>> {
        let width = ctx.info.cores;
        let requester = txn.requester();
        let remote_owner = entry.owner.filter(|&o| o != requester && entry.state.is_owner_state());
        let (snoop, targets) = match remote_owner {
            Some(owner) if self.migratory && txn.kind() == MessageKind::Read && entry.migratory => {
                debug!(bank = ctx.info.bank, address = %entry.tag, owner, requester, "migratory read");
                txn.migratory_read = true;
                (MessageKind::Invalidate, SharingVector::with_sharer(width, owner)?)
            }
            Some(owner) => (MessageKind::Downgrade, SharingVector::with_sharer(width, owner)?),
            None => (MessageKind::Downgrade, SharingVector::new(width)),
        };
        let sharers = entry.sharers.clone();
        launch(ctx, process, txn, snoop, &targets, false, |t| Self::grant(t, &sharers))
    }

    /// Marks the entry migratory when write permission alternates between two nodes.
    fn detect_migratory(&self, ctx: &mut BankContext, requester: NodeId, entry: &DirectoryEntry) -> Result<()> {
        if !self.migratory {
            return Ok(());
        }
        let migratory = match entry.sharers.without(requester)?.count_sharers() {
            1 if entry.last_writer.is_some_and(|w| w != requester) => true,
            0 | 1 => return Ok(()),
            _ => false,
        };
        if migratory != entry.migratory {
            debug!(bank = ctx.info.bank, address = %entry.tag, migratory, "migratory flag changed");
            let _ = ctx.directory.update(entry.tag, |e| e.migratory = migratory);
        }
        Ok(())
    }

    pub(super) fn handle_snoop(&self, ctx: &mut BankContext, process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let t = &process.transport;
        match t.kind {
            kind if kind.is_evict() => self.evict_from_cache(ctx, process),
            MessageKind::DowngradeAck | MessageKind::InvalidateAck => {
                let in_transaction = ctx
                    .maf
                    .transaction(t.address)
                    .is_some_and(|txn| txn.awaiting.is_sharer(t.source).unwrap_or(false));
                if in_transaction {
                    self.snoop_ack(ctx, process)
                } else if t.kind == MessageKind::InvalidateAck && ctx.eb.is_awaiting(t.address, t.source) {
                    self.back_invalidate_ack(ctx, process)
                } else {
                    Err(ctx.violation(t.address, format!("unexpected {} from node {}", t.kind, t.source)))
                }
            }
            other => Err(ctx.violation(t.address, format!("{other} on the snoop channel"))),
        }
    }

    fn snoop_ack(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let t = process.transport.clone();
        let (address, source) = (t.address, t.source);
        let applied = if t.kind == MessageKind::DowngradeAck && t.has_data {
            if t.dirty {
                process.outbox.requests.push(writeback(address, source));
            }
            ctx.directory.update(address, DirectoryEntry::downgrade_owner)
        } else {
            ctx.directory.update(address, |e| e.remove_sharer(source).map(|_| ())).transpose()?
        };
        if applied.is_none() {
            return Err(ctx.violation(address, format!("{} for an untracked block", t.kind)));
        }

        let Some(txn) = ctx.maf.transaction_mut(address) else {
            return Err(ctx.violation(address, "snoop response without a transaction"));
        };
        match txn.record_ack(source, t.has_data, t.dirty)? {
            AckOutcome::Waiting => process.action = ProcessAction::SnoopAndWait,
            AckOutcome::Probe(next) => {
                process.outbox.snoops.push(next);
                process.action = ProcessAction::SnoopAndWait;
            }
            AckOutcome::Done => {
                let width = ctx.info.cores;
                let sharers = ctx.directory.peek(address).map_or_else(|| SharingVector::new(width), |e| e.sharers.clone());
                let Some(txn) = ctx.maf.transaction_mut(address) else {
                    return Err(ctx.violation(address, "transaction closed while snooping"));
                };
                let grant = Self::grant(txn, &sharers)?;
                reply(txn, grant, &mut process.outbox);
                process.action = ProcessAction::Reply;
            }
            AckOutcome::Unexpected => {
                return Err(ctx.violation(address, format!("{} from node {source} was not awaited", t.kind)));
            }
        }
        Ok(Some(process))
    }

    fn back_invalidate_ack(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let (address, source) = (process.transport.address, process.transport.source);
        process.action = ProcessAction::NoAction;
        if process.transport.dirty {
            process.outbox.requests.push(writeback(address, source));
            process.action = ProcessAction::Forward;
        }
        match ctx.eb.record_ack(address, source)? {
            EvictProgress::Freed => Self::evict_buffer_freed(ctx, address),
            EvictProgress::Pending => {}
            EvictProgress::NotFound => {
                return Err(ctx.violation(address, format!("BackInvalidate ack from node {source} was not awaited")));
            }
        }
        Ok(Some(process))
    }

    fn evict_from_cache(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let (address, source) = (process.transport.address, process.transport.source);
        match ctx.eb.remove_sharer(address, source)? {
            EvictProgress::NotFound => {
                let removed = ctx.directory.update(address, |e| e.remove_sharer(source)).transpose()?;
                match removed {
                    None => return Err(ctx.violation(address, format!("eviction by node {source} of an untracked block"))),
                    Some(false) => debug!(bank = ctx.info.bank, %address, source, "eviction from a non-sharer"),
                    Some(true) => {}
                }
            }
            EvictProgress::Pending => {}
            EvictProgress::Freed => Self::evict_buffer_freed(ctx, address),
        }
        acknowledge_eviction(&mut process);
        Ok(Some(process))
    }

    fn evict_buffer_freed(ctx: &mut BankContext, address: MemoryAddress) {
        let woken = ctx.maf.wake_parked(|a, reason| a == address && reason == BlockReason::Evict);
        debug!(bank = ctx.info.bank, %address, woken, "Evict Buffer entry drained");
    }

    /// Applies the outcome of a completed transaction to its entry.
    pub(super) fn commit(&self, ctx: &mut BankContext, txn: &Transaction) -> Result<()> {
        let address = txn.request.address;
        let requester = txn.requester();
        let grant = txn.grant.unwrap_or_default();
        let outcome = ctx.directory.update(address, |e| -> Result<Option<String>> {
            match grant {
                CacheState::Shared | CacheState::Forward => e.add_shared(requester)?,
                CacheState::Invalid | CacheState::InvalidPresent => e.invalidate(),
                owner => e.set_owner(requester, owner)?,
            }
            if grant == CacheState::Modified {
                e.last_writer = Some(requester);
            }
            Ok(e.invariant_violation())
        });
        match outcome {
            None => Err(ctx.violation(address, "completion for an untracked block")),
            Some(result) => match result? {
                Some(broken) => Err(ctx.violation(address, broken)),
                None => Ok(()),
            },
        }
    }

    /// Unprotects the entry once no operation on `address` remains and wakes
    /// requests stalled on its set.
    pub(super) fn release(&self, ctx: &mut BankContext, address: MemoryAddress) {
        if ctx.maf.contains(address) {
            return;
        }
        ctx.directory.set_protected(address, false);
        let directory = &ctx.directory;
        let woken = ctx.maf.wake_parked(|a, reason| reason == BlockReason::Set && directory.same_set(a, address));
        if woken > 0 {
            debug!(bank = ctx.info.bank, %address, woken, "set released");
        }
    }

    /// Sends the BackInvalidate built for the oldest undrained Evict Buffer entry.
    pub(super) fn drain(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let address = process.transport.address;
        if ctx.eb.start_invalidation(address).is_none() {
            return Err(ctx.violation(address, "no Evict Buffer entry waiting for invalidation"));
        }
        process.outbox.snoops.push(process.transport.clone());
        process.action = ProcessAction::SnoopAndWait;
        Ok(Some(process))
    }
}
