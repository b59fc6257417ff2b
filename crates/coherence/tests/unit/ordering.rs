//! Same-address ordering, MAF backpressure and set stalls.

use dirsim_core::maf::{BlockReason, MafState};
use dirsim_core::{CacheState, Destination, DirectoryConfig, MessageKind};
use pretty_assertions::assert_eq;

use crate::common::{Harness, block, config};

#[test]
fn same_address_writes_are_served_in_arrival_order() {
    let mut h = Harness::new(DirectoryConfig { dir_latency: 10, ..config("infinite", "") });
    let a = block(2);
    for node in 0..4 {
        h.issue(MessageKind::Write, a, node);
    }
    for _ in 0..6 {
        h.step().unwrap();
    }
    let maf = h.controller.banks()[0].maf();
    assert_eq!(maf.len(), 4);
    assert_eq!(maf.state(a), Some(MafState::Active));
    let waiting: Vec<_> = maf.waiters(a).iter().map(|t| t.requester).collect();
    assert_eq!(waiting, vec![1, 2, 3]);

    let _ = h.settle();
    let replied: Vec<_> = h.sent_of(MessageKind::WriteReply).iter().map(|t| t.requester).collect();
    assert_eq!(replied, vec![0, 1, 2, 3]);
    let invalidated: Vec<_> = h.sent_of(MessageKind::Invalidate).iter().map(|t| t.destination.clone()).collect();
    assert_eq!(invalidated, vec![Destination::Node(0), Destination::Node(1), Destination::Node(2)]);
    assert_eq!(h.holders(a), vec![3]);
    assert_eq!(h.state(3, a), CacheState::Modified);
}

#[test]
fn different_addresses_proceed_in_parallel() {
    let mut h = Harness::new(DirectoryConfig { dir_latency: 10, ..config("infinite", "") });
    h.issue(MessageKind::Write, block(1), 0);
    h.issue(MessageKind::Write, block(2), 1);
    for _ in 0..3 {
        h.step().unwrap();
    }
    assert_eq!(h.controller.banks()[0].maf().active_addresses(), vec![block(1), block(2)]);
    let _ = h.settle();
    assert_eq!(h.sent_of(MessageKind::WriteReply).len(), 2);
}

#[test]
fn full_maf_holds_requests_back() {
    let mut h = Harness::new(DirectoryConfig { maf_size: 1, ..config("infinite", "") });
    for node in 0..4 {
        h.issue(MessageKind::Read, block(node as u64 + 10), node);
    }
    while !h.idle() {
        h.step().unwrap();
        assert!(h.controller.banks()[0].maf().len() <= 1);
        assert!(h.controller.cycle() < 500, "requests starved");
    }
    assert_eq!(h.sent_of(MessageKind::ReadReply).len(), 4);
}

#[test]
fn entry_stays_protected_until_completion() {
    let mut h = Harness::new(config("std", "sets=4:assoc=2"));
    let a = block(3);
    h.issue(MessageKind::Read, a, 1);
    while h.sent_of(MessageKind::ReadReply).is_empty() {
        h.step().unwrap();
    }
    assert!(h.entry(a).unwrap().modifiers.protected);
    let _ = h.settle();
    assert!(!h.entry(a).unwrap().modifiers.protected);
}

#[test]
fn request_stalls_on_a_fully_protected_set() {
    let mut h = Harness::new(config("std", "sets=1:assoc=1"));
    let (a, b) = (block(0), block(1));
    h.issue(MessageKind::Read, a, 0);
    h.issue(MessageKind::Read, b, 1);
    let mut stalled = false;
    while !h.idle() {
        h.step().unwrap();
        stalled |= h.controller.banks()[0].maf().state(b) == Some(MafState::Parked(BlockReason::Set));
    }
    assert!(stalled, "second request never waited for the set");

    let reply_a = h.position(|t| t.kind == MessageKind::ReadReply && t.address == a).unwrap();
    let evict_a = h.position(|t| t.kind == MessageKind::BackInvalidate && t.address == a).unwrap();
    let reply_b = h.position(|t| t.kind == MessageKind::ReadReply && t.address == b).unwrap();
    assert!(reply_a < reply_b);
    assert!(reply_a < evict_a);
    assert!(h.holders(a).is_empty());
    assert_eq!(h.holders(b), vec![1]);
    assert!(h.entry(a).is_none());
}
