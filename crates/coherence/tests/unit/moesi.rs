//! Inclusive MOESI request flows driven through a single-bank controller.

use dirsim_core::{CacheState, Destination, DirectoryConfig, MessageKind, SharingVector};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

use crate::common::{Harness, apply, block, config, ops};

#[test]
fn first_read_is_granted_exclusive() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(3);
    h.request(MessageKind::Read, a, 2);

    let reply = h.sent_of(MessageKind::ReadReply)[0];
    assert_eq!(reply.destination, Destination::Node(2));
    assert_eq!(reply.grant, Some(CacheState::Exclusive));
    assert!(reply.has_data);
    assert!(h.sent_of(MessageKind::Downgrade).is_empty());

    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Exclusive);
    assert_eq!(entry.owner, Some(2));
    assert!(!entry.modifiers.protected);
}

#[test]
fn read_then_upgrade_needs_no_invalidation() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(1);
    h.request(MessageKind::Read, a, 0);
    h.request(MessageKind::Upgrade, a, 0);

    assert!(h.sent_of(MessageKind::Invalidate).is_empty());
    let reply = h.sent_of(MessageKind::UpgradeReply)[0];
    assert_eq!(reply.grant, Some(CacheState::Modified));
    assert!(!reply.has_data);
    assert_eq!(h.state(0, a), CacheState::Modified);

    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Modified);
    assert_eq!(entry.sharers.to_list(), vec![0]);
    assert_eq!(entry.last_writer, Some(0));
}

#[test]
fn readers_of_a_modified_block_end_shared() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(7);
    h.request(MessageKind::Write, a, 0);
    h.request(MessageKind::Read, a, 1);
    h.request(MessageKind::Read, a, 2);

    let downgrades = h.sent_of(MessageKind::Downgrade);
    assert_eq!(downgrades.len(), 1);
    assert_eq!(downgrades[0].destination, Destination::Node(0));
    assert_eq!(downgrades[0].requester, 1);

    assert_eq!(h.memory.len(), 1);
    assert_eq!(h.memory[0].kind, MessageKind::Writeback);
    assert_eq!(h.memory[0].requester, 0);
    assert_eq!(h.memory[0].destination, Destination::Memory);

    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Shared);
    assert_eq!(entry.owner, None);
    assert_eq!(entry.sharers.to_list(), vec![0, 1, 2]);
    assert_eq!(h.holders(a), vec![0, 1, 2]);
    for node in 0..3 {
        assert_eq!(h.state(node, a), CacheState::Shared);
    }
}

#[test]
fn fetch_is_always_shared() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(2);
    h.request(MessageKind::Fetch, a, 4);
    let reply = h.sent_of(MessageKind::FetchReply)[0];
    assert_eq!(reply.grant, Some(CacheState::Shared));
    assert_eq!(h.entry(a).unwrap().state, CacheState::Shared);
}

#[test]
fn write_invalidates_every_other_sharer_with_one_multicast() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(9);
    for node in [1, 2, 3] {
        h.request(MessageKind::Read, a, node);
    }
    h.request(MessageKind::Write, a, 0);

    let invalidates = h.sent_of(MessageKind::Invalidate);
    assert_eq!(invalidates.len(), 1);
    let mut expected = SharingVector::new(8);
    for node in [1, 2, 3] {
        expected.add_sharer(node).unwrap();
    }
    assert_eq!(invalidates[0].destination, Destination::Multicast(expected));

    let reply = h.sent_of(MessageKind::WriteReply)[0];
    assert_eq!(reply.grant, Some(CacheState::Modified));
    assert_eq!(h.holders(a), vec![0]);
    assert_eq!(h.entry(a).unwrap().owner, Some(0));
}

#[test]
fn sequential_fanout_probes_closest_sharer_first() {
    let mut h = Harness::new(DirectoryConfig { always_multicast: false, ..config("infinite", "") });
    let a = block(4);
    for node in [6, 2, 5] {
        h.request(MessageKind::Read, a, node);
    }
    h.request(MessageKind::Write, a, 4);

    let order: Vec<_> = h.sent_of(MessageKind::Invalidate).iter().map(|t| t.destination.clone()).collect();
    assert_eq!(order, vec![Destination::Node(5), Destination::Node(6), Destination::Node(2)]);
    assert_eq!(h.holders(a), vec![4]);
}

#[test]
fn upgrade_from_a_non_sharer_is_serviced_as_write() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(5);
    h.request(MessageKind::Read, a, 0);
    h.request(MessageKind::Read, a, 1);
    assert!(h.evict(a, 0));
    let _ = h.settle();
    assert_eq!(h.entry(a).unwrap().sharers.to_list(), vec![1]);

    h.request(MessageKind::Upgrade, a, 0);
    assert!(h.sent_of(MessageKind::UpgradeReply).is_empty());
    let reply = h.sent_of(MessageKind::WriteReply)[0];
    assert!(reply.has_data);
    assert_eq!(reply.grant, Some(CacheState::Modified));
    assert_eq!(h.holders(a), vec![0]);
}

#[test]
fn non_allocating_store_flushes_the_owner_and_goes_to_memory() {
    let mut h = Harness::new(config("infinite", ""));
    let a = block(12);
    h.request(MessageKind::Write, a, 1);
    h.request(MessageKind::NonAllocatingStore, a, 0);

    let kinds: Vec<_> = h.memory.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Writeback, MessageKind::MemoryStore]);
    let reply = h.sent_of(MessageKind::NasReply)[0];
    assert_eq!(reply.grant, Some(CacheState::Invalid));

    let entry = h.entry(a).unwrap();
    assert_eq!(entry.state, CacheState::Invalid);
    assert!(entry.sharers.is_empty());
    assert!(h.holders(a).is_empty());
}

#[rstest]
#[case::enabled(true, CacheState::Modified)]
#[case::disabled(false, CacheState::Shared)]
fn migratory_blocks_move_with_write_permission(#[case] migratory: bool, #[case] read_grant: CacheState) {
    let mut h = Harness::new(DirectoryConfig { migratory_optimization: migratory, ..config("infinite", "") });
    let a = block(6);
    h.request(MessageKind::Write, a, 0);
    h.request(MessageKind::Write, a, 1);
    assert_eq!(h.entry(a).unwrap().migratory, migratory);

    h.request(MessageKind::Read, a, 0);
    let reply = h.sent_of(MessageKind::ReadReply)[0];
    assert_eq!(reply.grant, Some(read_grant));
    if migratory {
        assert!(h.sent_of(MessageKind::Downgrade).is_empty());
        assert_eq!(h.state(1, a), CacheState::Invalid);
        assert_eq!(h.entry(a).unwrap().owner, Some(0));
    } else {
        assert_eq!(h.sent_of(MessageKind::Downgrade).len(), 1);
        assert_eq!(h.holders(a), vec![0, 1]);
    }
}

#[test]
fn migratory_flag_clears_when_sharing_widens() {
    let mut h = Harness::new(DirectoryConfig { migratory_optimization: true, ..config("infinite", "") });
    let a = block(8);
    h.request(MessageKind::Write, a, 0);
    h.request(MessageKind::Write, a, 1);
    assert!(h.entry(a).unwrap().migratory);

    h.request(MessageKind::Fetch, a, 2);
    h.request(MessageKind::Fetch, a, 3);
    h.request(MessageKind::Write, a, 2);
    assert!(!h.entry(a).unwrap().migratory);
}

fn assert_directory_matches_caches(h: &Harness, blocks: u64) {
    for b in 0..blocks {
        let a = block(b);
        let holders = h.holders(a);
        let Some(entry) = h.entry(a) else {
            assert!(holders.is_empty(), "{a} cached by {holders:?} but untracked");
            continue;
        };
        assert_eq!(entry.invariant_violation(), None);
        assert!(!entry.modifiers.protected, "{a} still protected");
        assert_eq!(entry.sharers.to_list(), holders, "sharers of {a}");
        for node in holders {
            assert_eq!(h.state(node, a), entry.state, "node {node} at {a}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn directory_tracks_every_copy_exactly(
        actions in ops(4, 6, 40),
        multicast in any::<bool>(),
        migratory in any::<bool>(),
        set_assoc in any::<bool>(),
    ) {
        let base = if set_assoc { config("std", "sets=2:assoc=2") } else { config("infinite", "") };
        let mut h = Harness::new(DirectoryConfig {
            always_multicast: multicast,
            migratory_optimization: migratory,
            evict_buffer_size: 2,
            ..base
        });
        for op in actions {
            apply(&mut h, op);
            assert_directory_matches_caches(&h, 6);
        }
    }
}
