//! Tagless filter soundness and snooping.

use dirsim_core::directory::Directory;
use dirsim_core::{CacheState, Destination, DirectoryConfig, MemoryAddress, MessageKind, SharingVector};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::{Harness, apply, block, ops, tagless_config};

fn candidates(h: &Harness, address: MemoryAddress) -> SharingVector {
    let bank = h.controller.home_bank(address);
    match h.controller.banks()[bank].directory() {
        Directory::Tagless(filter) => filter.lookup(address),
        other => panic!("expected a tagless directory, found {}", other.name()),
    }
}

#[test]
fn first_reader_gets_exclusive_then_later_readers_share() {
    let mut h = Harness::new(tagless_config("sets=4:buckets=16:hashes=2"));
    let a = block(3);
    h.request(MessageKind::Read, a, 0);
    assert_eq!(h.state(0, a), CacheState::Exclusive);
    assert!(candidates(&h, a).is_sharer(0).unwrap());

    h.request(MessageKind::Read, a, 1);
    let downgrades = h.sent_of(MessageKind::Downgrade);
    assert_eq!(downgrades.len(), 1);
    assert_eq!(downgrades[0].destination, Destination::Node(0));
    assert_eq!(h.state(0, a), CacheState::Shared);
    assert_eq!(h.state(1, a), CacheState::Shared);
}

#[test]
fn write_invalidates_all_candidates() {
    let mut h = Harness::new(tagless_config(""));
    let a = block(1);
    for node in [1, 2, 3] {
        h.request(MessageKind::Read, a, node);
    }
    h.request(MessageKind::Write, a, 0);
    let invalidate = h.sent_of(MessageKind::Invalidate)[0];
    let Destination::Multicast(set) = &invalidate.destination else {
        panic!("expected a multicast, got {invalidate}");
    };
    assert!([1, 2, 3].iter().all(|&n| set.is_sharer(n).unwrap()));
    assert!(!set.is_sharer(0).unwrap());
    assert_eq!(h.holders(a), vec![0]);
    assert_eq!(h.state(0, a), CacheState::Modified);
}

#[test]
fn sequential_read_stops_at_the_first_copy() {
    let mut h = Harness::new(DirectoryConfig { always_multicast: false, ..tagless_config("") });
    let a = block(2);
    for node in [3, 5, 7] {
        h.request(MessageKind::Fetch, a, node);
    }
    let before = h.sent_of(MessageKind::Downgrade).len();
    h.request(MessageKind::Read, a, 4);

    let probes: Vec<_> = h.sent_of(MessageKind::Downgrade)[before..].iter().map(|t| t.destination.clone()).collect();
    assert_eq!(probes, vec![Destination::Node(5)]);
    assert_eq!(h.state(4, a), CacheState::Shared);
    assert_eq!(h.state(7, a), CacheState::Shared);
}

#[test]
fn evictions_are_acknowledged_and_remembered() {
    let mut h = Harness::new(tagless_config(""));
    let a = block(9);
    h.request(MessageKind::Write, a, 2);
    assert!(h.evict(a, 2));
    let _ = h.settle();
    assert_eq!(h.sent_of(MessageKind::EvictAck).len(), 1);
    assert_eq!(h.memory[0].kind, MessageKind::Writeback);
    assert!(candidates(&h, a).is_sharer(2).unwrap(), "filter bits are never cleared");

    h.request(MessageKind::Read, a, 1);
    assert_eq!(h.sent_of(MessageKind::Downgrade)[0].destination, Destination::Node(2));
    assert_eq!(h.state(1, a), CacheState::Exclusive);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn filter_never_misses_a_holder(
        actions in ops(6, 12, 40),
        multicast in any::<bool>(),
        hashes in 1usize..=3,
    ) {
        let params = format!("sets=2:buckets=4:hashes={hashes}");
        let mut h = Harness::new(DirectoryConfig { always_multicast: multicast, ..tagless_config(&params) });
        for op in actions {
            apply(&mut h, op);
            for b in 0..12 {
                let a = block(b);
                let filter = candidates(&h, a);
                for node in h.holders(a) {
                    prop_assert!(filter.is_sharer(node).unwrap(), "node {} holds {} but is not a candidate", node, a);
                }
            }
        }
    }
}
