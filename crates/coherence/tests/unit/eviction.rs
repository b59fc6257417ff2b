//! Evict Buffer draining, reinstalls and cache-initiated evictions.

use dirsim_core::config::DirectoryParams;
use dirsim_core::directory::DirectoryRegistry;
use dirsim_core::maf::{BlockReason, MafState};
use dirsim_core::process::{ProcessAction, ProcessEntry, ProcessType};
use dirsim_core::protocol::{BankContext, DirectoryPolicy, PolicyRegistry};
use dirsim_core::{CacheState, Destination, DirectoryConfig, MemoryAddress, MessageKind, NodeId, Transport};
use pretty_assertions::assert_eq;

use crate::common::{Harness, block, config};

#[test]
fn full_evict_buffer_drains_before_the_next_request() {
    let mut h = Harness::new(DirectoryConfig { evict_buffer_size: 1, ..config("std", "sets=1:assoc=1") });
    let (a, b, c) = (block(0), block(1), block(2));
    h.request(MessageKind::Read, a, 0);
    h.issue(MessageKind::Read, b, 1);
    h.issue(MessageKind::Read, c, 2);
    while !h.idle() {
        h.step().unwrap();
        assert!(h.controller.banks()[0].evict_buffer().len() <= 1);
        assert!(h.controller.cycle() < 500, "evict buffer never drained");
    }

    let drain_a = h.position(|t| t.kind == MessageKind::BackInvalidate && t.address == a).unwrap();
    let reply_c = h.position(|t| t.kind == MessageKind::ReadReply && t.address == c).unwrap();
    assert!(drain_a < reply_c);
    assert_eq!(h.sent[drain_a].destination, Destination::Node(0));

    assert!(h.holders(a).is_empty());
    assert!(h.holders(b).is_empty());
    assert_eq!(h.holders(c), vec![2]);
    assert!(h.controller.banks()[0].evict_buffer().is_empty());
    assert_eq!(h.entry(c).unwrap().state, CacheState::Exclusive);
}

#[test]
fn dirty_back_invalidation_is_written_back() {
    let mut h = Harness::new(config("std", "sets=1:assoc=1"));
    h.request(MessageKind::Write, block(0), 3);
    h.request(MessageKind::Read, block(1), 4);
    let writebacks = h.memory.iter().filter(|t| t.kind == MessageKind::Writeback).collect::<Vec<_>>();
    assert_eq!(writebacks.len(), 1);
    assert_eq!(writebacks[0].address, block(0));
    assert_eq!(writebacks[0].requester, 3);
}

#[test]
fn region_replacement_drains_every_shared_block() {
    let mut h = Harness::new(DirectoryConfig { evict_buffer_size: 4, ..config("region", "sets=1:assoc=1:region_size=256") });
    assert_eq!(h.controller.banks()[0].directory().eb_requirement(), 4);
    h.request(MessageKind::Read, block(0), 0);
    h.request(MessageKind::Read, block(2), 1);
    h.request(MessageKind::Read, block(4), 2);

    let drained: Vec<_> = h.sent_of(MessageKind::BackInvalidate).iter().map(|t| t.address).collect();
    assert_eq!(drained, vec![block(0), block(2)]);
    assert!(h.holders(block(0)).is_empty());
    assert!(h.holders(block(2)).is_empty());
    assert_eq!(h.holders(block(4)), vec![2]);
}

#[test]
fn cache_evictions_update_the_directory() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(5);
    h.request(MessageKind::Write, a, 2);
    assert!(h.evict(a, 2));
    let _ = h.settle();

    let ack = h.sent_of(MessageKind::EvictAck)[0];
    assert_eq!(ack.destination, Destination::Node(2));
    assert_eq!(h.memory.len(), 1);
    assert_eq!(h.memory[0].kind, MessageKind::Writeback);
    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Invalid);
    assert!(entry.sharers.is_empty());

    h.request(MessageKind::Read, a, 1);
    assert!(h.sent_of(MessageKind::Downgrade).is_empty());
    assert_eq!(h.state(1, a), CacheState::Exclusive);
}

#[test]
fn sharer_eviction_keeps_the_rest() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(6);
    for node in [0, 1, 2] {
        h.request(MessageKind::Read, a, node);
    }
    assert!(h.evict(a, 1));
    let _ = h.settle();
    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Shared);
    assert_eq!(entry.sharers.to_list(), vec![0, 2]);
}

/// A bank's parts driven one process at a time.
struct Bank {
    ctx: BankContext,
    policy: DirectoryPolicy,
}

impl Bank {
    fn new(evict_buffer_size: usize) -> Self {
        let config = DirectoryConfig { evict_buffer_size, ..config("std", "sets=1:assoc=1") };
        let info = config.bank_info(0);
        let params = DirectoryParams::parse(&config.directory_config).unwrap();
        let directory = DirectoryRegistry::with_builtin().build("std", &info, &params).unwrap();
        let policy = PolicyRegistry::with_builtin().build("InclusiveMOESI", &info, &directory).unwrap();
        Self { ctx: BankContext::new(info, directory), policy }
    }

    fn run(&mut self, kind: ProcessType, transport: Transport) -> Option<ProcessEntry> {
        self.policy.handle(&mut self.ctx, ProcessEntry::new(kind, transport)).unwrap()
    }

    fn read(&mut self, address: MemoryAddress, node: NodeId) -> Option<ProcessEntry> {
        self.run(ProcessType::Request, Transport::new(MessageKind::Read, address, node))
    }

    fn complete(&mut self, address: MemoryAddress, node: NodeId) {
        let done = self.run(ProcessType::Reply, Transport::new(MessageKind::ReadAck, address, node)).unwrap();
        assert_eq!(done.action, ProcessAction::Complete);
    }

    fn drain(&mut self) -> Transport {
        let snoop = self.policy.evict_block_transport(&self.ctx).unwrap();
        let done = self.run(ProcessType::Evict, snoop.clone()).unwrap();
        assert_eq!(done.outbox.snoops, vec![snoop.clone()]);
        snoop
    }
}

#[test]
fn evict_buffer_space_gates_requests() {
    let mut bank = Bank::new(1);
    let (a, b) = (block(0), block(1));
    let _ = bank.read(a, 0).unwrap();
    bank.complete(a, 0);
    let _ = bank.read(b, 1).unwrap();
    assert!(bank.ctx.eb.full());

    let next = Transport::new(MessageKind::Read, block(2), 2);
    assert!(!bank.policy.eb_has_space(&bank.ctx, &next));
    assert!(bank.policy.evict_work_required(&bank.ctx));

    let snoop = bank.drain();
    assert_eq!(snoop.kind, MessageKind::BackInvalidate);
    assert_eq!(snoop.address, a);
    assert!(!bank.policy.eb_has_space(&bank.ctx, &next));
    assert!(!bank.policy.evict_work_required(&bank.ctx));

    let ack = Transport::snoop_response(MessageKind::InvalidateAck, a, 0, 0, true, false);
    let _ = bank.run(ProcessType::Snoop, ack).unwrap();
    assert!(bank.ctx.eb.is_empty());
    assert!(bank.policy.eb_has_space(&bank.ctx, &next));
}

#[test]
fn request_for_an_invalidating_block_waits_for_the_drain() {
    let mut bank = Bank::new(2);
    let (a, b) = (block(0), block(1));
    let _ = bank.read(a, 0).unwrap();
    bank.complete(a, 0);
    let _ = bank.read(b, 1).unwrap();
    bank.complete(b, 1);
    let _ = bank.drain();

    assert!(bank.read(a, 2).is_none());
    assert_eq!(bank.ctx.maf.state(a), Some(MafState::Parked(BlockReason::Evict)));

    let ack = Transport::snoop_response(MessageKind::InvalidateAck, a, 0, 0, true, false);
    let _ = bank.run(ProcessType::Snoop, ack).unwrap();
    assert_eq!(bank.ctx.maf.state(a), Some(MafState::Waking));

    let mut woken = bank.ctx.maf.take_waking().unwrap();
    woken.kind = ProcessType::WakeMaf;
    let done = bank.policy.handle(&mut bank.ctx, woken).unwrap().unwrap();
    assert_eq!(done.action, ProcessAction::Reply);
    assert_eq!(done.outbox.replies[0].grant, Some(CacheState::Exclusive));
    assert!(bank.ctx.eb.find(b).is_some(), "b makes room for a");
}

#[test]
fn request_for_a_buffered_block_reinstalls_it() {
    let mut bank = Bank::new(2);
    let (a, b) = (block(0), block(1));
    let _ = bank.read(a, 0).unwrap();
    bank.complete(a, 0);
    let _ = bank.read(b, 1).unwrap();
    bank.complete(b, 1);
    assert!(bank.ctx.eb.find(a).is_some_and(|e| !e.invalidating));

    let done = bank.read(a, 0).unwrap();
    assert!(done.outbox.snoops.is_empty());
    assert!(bank.ctx.eb.find(a).is_none());
    assert!(bank.ctx.eb.find(b).is_some());
    let entry = bank.ctx.directory.peek(a).unwrap();
    assert_eq!(entry.sharers.to_list(), vec![0]);
    assert!(entry.modifiers.protected);
}
