//! Bank routing.

use dirsim_core::{BankedController, DirectoryConfig, MemoryAddress, MessageKind, Transport};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::{Harness, block, config};

fn banked(banks: usize, interleaving: u64, skew_shift: u32, local_directory: bool) -> BankedController {
    BankedController::new(DirectoryConfig { banks, interleaving, skew_shift, local_directory, ..config("infinite", "") })
        .unwrap()
}

proptest! {
    #[test]
    fn home_bank_depends_only_on_the_block(
        raw in any::<u64>(),
        banks_log in 0u32..4,
        interleave_log in 6u32..12,
        skew_shift in prop_oneof![Just(0u32), 12u32..40],
        port in 0usize..8,
    ) {
        let c = banked(1 << banks_log, 1 << interleave_log, skew_shift, true);
        let a = MemoryAddress::new(raw);
        let bank = c.home_bank(a);
        prop_assert!(bank < c.num_ports());
        prop_assert_eq!(bank, c.home_bank(a.block_aligned(64)));
        prop_assert_eq!(bank, banked(1 << banks_log, 1 << interleave_log, skew_shift, true).home_bank(a));

        let t = Transport::new(MessageKind::Read, a, 3);
        prop_assert_eq!(c.map_incoming(&t, port % c.num_ports()), bank);
        prop_assert_eq!(c.map_outgoing(&t, bank), 3 % c.num_ports());
    }
}

#[test]
fn interleaving_groups_consecutive_blocks() {
    let c = banked(4, 256, 0, true);
    let banks: Vec<_> = (0..16).map(|b| c.home_bank(block(b))).collect();
    assert_eq!(banks, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
}

#[test]
fn skew_folds_high_bits_into_the_bank() {
    let plain = banked(4, 64, 0, true);
    let skewed = banked(4, 64, 12, true);
    let a = MemoryAddress::new(0x1000);
    assert_eq!(plain.home_bank(a), 0);
    assert_eq!(skewed.home_bank(a), 1);
}

#[test]
fn without_local_directory_ports_map_to_banks() {
    let c = banked(4, 64, 0, false);
    let t = Transport::new(MessageKind::Write, block(1), 6);
    assert_eq!(c.map_incoming(&t, 2), 2);
    assert_eq!(c.map_outgoing(&t, 3), 3);
}

#[test]
fn each_bank_tracks_only_its_own_blocks() {
    let mut h = Harness::new(DirectoryConfig { banks: 4, local_directory: true, ..config("infinite", "") });
    for b in 0..8 {
        h.request(MessageKind::Read, block(b), (b % 8) as usize);
    }
    for b in 0..8 {
        let a = block(b);
        let home = h.controller.home_bank(a);
        for (index, bank) in h.controller.banks().iter().enumerate() {
            assert_eq!(bank.directory().peek(a).is_some(), index == home, "{a} in bank {index}");
        }
    }
}

#[test]
fn push_rejects_nodes_beyond_the_core_count() {
    let mut c = banked(1, 64, 0, false);
    let err = c.push(0, Transport::new(MessageKind::Read, block(0), 8)).unwrap_err();
    assert!(matches!(err, dirsim_core::DirectoryError::SharerOutOfRange { index: 8, width: 8 }));
}

#[test]
fn push_aligns_addresses_to_blocks() {
    let mut h = Harness::new(config("infinite", ""));
    h.request(MessageKind::Read, MemoryAddress::new(0x47), 1);
    assert_eq!(h.sent_of(MessageKind::ReadReply)[0].address, block(1));
    assert!(h.entry(block(1)).is_some());
}
