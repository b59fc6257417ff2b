//! Protocol over the tagless sharer filter.
//!
//! The filter only answers "which nodes might hold this block", so every
//! request snoops all candidates other than the requester. Nodes that do not
//! hold the block answer without data. Reads grant Exclusive when no snoop
//! returned data and Shared otherwise. Since the filter cannot forget a node,
//! evictions are only acknowledged.

use tracing::trace;

use super::{BankContext, acknowledge_eviction, launch, reply, writeback};
use crate::common::Result;
use crate::message::MessageKind;
use crate::process::{ProcessAction, ProcessEntry};
use crate::state::{CacheState, SharingVector};
use crate::transaction::{AckOutcome, Fanout, Transaction};

/// Tagless state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaglessPolicy;

impl TaglessPolicy {
    fn grant(txn: &Transaction) -> CacheState {
        match txn.kind() {
            MessageKind::Read if txn.data_from_snoop => CacheState::Shared,
            MessageKind::Read => CacheState::Exclusive,
            MessageKind::Fetch => CacheState::Shared,
            MessageKind::Write | MessageKind::Upgrade => CacheState::Modified,
            _ => CacheState::Invalid,
        }
    }

    pub(super) fn dispatch(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let address = process.transport.address;
        let requester = process.transport.requester;
        let candidates = ctx
            .directory
            .lookup(address)
            .approximate
            .unwrap_or_else(|| SharingVector::new(ctx.info.cores));

        let mut request = process.transport.clone();
        if request.kind == MessageKind::Upgrade && !candidates.is_sharer(requester)? {
            request.kind = MessageKind::Write;
        }
        let txn = Transaction::new(request, ctx.info.cores);
        let others = candidates.without(requester)?;
        trace!(bank = ctx.info.bank, %address, candidates = %candidates, "tagless lookup");

        process.action = ProcessAction::NoAction;
        match txn.kind() {
            MessageKind::Read | MessageKind::Fetch => {
                let stop_on_data = ctx.fanout() == Fanout::Sequential;
                launch(ctx, process, txn, MessageKind::Downgrade, &others, stop_on_data, |t| Ok(Self::grant(t)))
            }
            MessageKind::Write | MessageKind::Upgrade => {
                launch(ctx, process, txn, MessageKind::Invalidate, &others, false, |t| Ok(Self::grant(t)))
            }
            MessageKind::NonAllocatingStore => {
                launch(ctx, process, txn, MessageKind::Invalidate, &candidates, false, |t| Ok(Self::grant(t)))
            }
            other => Err(ctx.violation(address, format!("{other} is not a request"))),
        }
    }

    pub(super) fn handle_snoop(&self, ctx: &mut BankContext, mut process: ProcessEntry) -> Result<Option<ProcessEntry>> {
        let t = process.transport.clone();
        if t.kind.is_evict() {
            acknowledge_eviction(&mut process);
            return Ok(Some(process));
        }
        if !t.kind.is_snoop_response() {
            return Err(ctx.violation(t.address, format!("{} on the snoop channel", t.kind)));
        }

        let Some(txn) = ctx.maf.transaction_mut(t.address) else {
            return Err(ctx.violation(t.address, format!("{} from node {} without a transaction", t.kind, t.source)));
        };
        let outcome = txn.record_ack(t.source, t.has_data, t.dirty)?;
        if t.kind == MessageKind::DowngradeAck && t.dirty {
            process.outbox.requests.push(writeback(t.address, t.source));
        }
        process.action = ProcessAction::SnoopAndWait;
        match outcome {
            AckOutcome::Waiting => {}
            AckOutcome::Probe(next) => process.outbox.snoops.push(next),
            AckOutcome::Done => {
                let grant = Self::grant(txn);
                reply(txn, grant, &mut process.outbox);
                process.action = ProcessAction::Reply;
            }
            AckOutcome::Unexpected => {
                return Err(ctx.violation(t.address, format!("{} from node {} was not awaited", t.kind, t.source)));
            }
        }
        Ok(Some(process))
    }

    /// Records the requester in the filter.
    pub(super) fn commit(&self, ctx: &mut BankContext, txn: &Transaction) -> Result<()> {
        match txn.grant {
            Some(CacheState::Invalid | CacheState::InvalidPresent) | None => Ok(()),
            Some(_) => ctx.directory.insert_approximate(txn.request.address, txn.requester()),
        }
    }
}
