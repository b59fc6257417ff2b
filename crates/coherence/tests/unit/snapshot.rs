//! Checkpoint save and restore through the controller.

use dirsim_core::{BankedController, CacheState, DirectoryConfig, DirectoryError, MessageKind};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::tempdir;

use crate::common::{Harness, block, config, tagless_config};

fn populate(h: &mut Harness) {
    h.request(MessageKind::Read, block(0), 0);
    h.request(MessageKind::Write, block(1), 1);
    h.request(MessageKind::Read, block(5), 2);
    h.request(MessageKind::Read, block(5), 3);
    h.request(MessageKind::Write, block(9), 4);
    h.request(MessageKind::Write, block(9), 5);
}

#[rstest]
#[case::infinite(config("infinite", ""))]
#[case::std(config("std", "sets=16:assoc=4:repl=lru"))]
#[case::region(config("region", "sets=8:assoc=2:region_size=256"))]
#[case::tagless(tagless_config("sets=8:buckets=16"))]
#[case::banked(DirectoryConfig { banks: 4, local_directory: true, ..config("std", "total_sets=64:assoc=2") })]
fn restored_controller_has_identical_directories(#[case] config: DirectoryConfig) {
    let mut h = Harness::new(config.clone());
    populate(&mut h);
    let dir = tempdir().unwrap();
    h.controller.save_state(dir.path()).unwrap();
    for bank in 0..config.banks {
        assert!(BankedController::snapshot_path(dir.path(), bank).exists());
    }

    let mut restored = BankedController::new(config).unwrap();
    restored.load_state(dir.path()).unwrap();
    for (before, after) in h.controller.banks().iter().zip(restored.banks()) {
        assert_eq!(after.save_state(), before.save_state());
        assert_eq!(after.directory().entries(), before.directory().entries());
    }
}

#[test]
fn restored_directory_drives_later_requests() {
    let config = config("std", "sets=16:assoc=4");
    let mut h = Harness::new(config.clone());
    populate(&mut h);
    let dir = tempdir().unwrap();
    h.controller.save_state(dir.path()).unwrap();

    let mut resumed = Harness::new(config);
    resumed.controller.load_state(dir.path()).unwrap();
    for node in [2, 3] {
        resumed.set_state(node, block(5), CacheState::Shared);
    }
    resumed.request(MessageKind::Write, block(5), 6);
    let invalidate = resumed.sent_of(MessageKind::Invalidate)[0];
    assert_eq!(invalidate.address, block(5));
    assert_eq!(resumed.holders(block(5)), vec![6]);
}

#[test]
fn snapshot_file_is_tagged_json() {
    let mut h = Harness::new(config("std", "sets=4:assoc=2"));
    populate(&mut h);
    let dir = tempdir().unwrap();
    h.controller.save_state(dir.path()).unwrap();
    let text = std::fs::read_to_string(BankedController::snapshot_path(dir.path(), 0)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["bank"], 0);
    assert_eq!(json["kind"], "std");
    assert_eq!(json["sets"], 4);
    assert!(json["entries"].as_array().is_some_and(|e| !e.is_empty()));
}

#[test]
fn missing_snapshot_starts_empty() {
    let mut h = Harness::new(config("infinite", ""));
    populate(&mut h);
    assert!(!h.controller.banks()[0].directory().entries().is_empty());

    let dir = tempdir().unwrap();
    h.controller.load_state(dir.path()).unwrap();
    assert!(h.controller.banks()[0].directory().entries().is_empty());
}

#[rstest]
#[case::other_geometry(config("std", "sets=8:assoc=4"))]
#[case::other_kind(config("infinite", ""))]
#[case::other_width(DirectoryConfig { cores: 16, ..config("std", "sets=16:assoc=4") })]
fn mismatched_snapshot_is_rejected(#[case] target: DirectoryConfig) {
    let mut h = Harness::new(config("std", "sets=16:assoc=4"));
    populate(&mut h);
    let dir = tempdir().unwrap();
    h.controller.save_state(dir.path()).unwrap();

    let mut other = BankedController::new(target).unwrap();
    let err = other.load_state(dir.path()).unwrap_err();
    assert!(matches!(err, DirectoryError::SnapshotMismatch { bank: 0, .. }), "got {err}");
}

#[test]
fn busy_bank_refuses_to_load() {
    let config = config("infinite", "");
    let mut h = Harness::new(config.clone());
    populate(&mut h);
    let dir = tempdir().unwrap();
    h.controller.save_state(dir.path()).unwrap();

    h.issue(MessageKind::Read, block(20), 7);
    while h.controller.banks()[0].maf().is_empty() {
        h.step().unwrap();
    }
    let err = h.controller.load_state(dir.path()).unwrap_err();
    assert!(matches!(err, DirectoryError::SnapshotMismatch { .. }));
}
