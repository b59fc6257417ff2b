//! # Configuration Tests
//!
//! JSON deserialization, defaults, parameter strings and the checks performed
//! before any bank is built.

use dirsim_core::config::{DirectoryConfig, DirectoryParams, ReplacementPolicy};
use dirsim_core::{BankedController, DirectoryError};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::config;

#[test]
fn empty_json_takes_defaults() {
    let config: DirectoryConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.dir_latency, 3);
    assert_eq!(config.dir_issue_latency, 1);
    assert_eq!(config.queue_size, 8);
    assert_eq!(config.maf_size, 32);
    assert_eq!(config.evict_buffer_size, 16);
    assert_eq!(config.directory_policy, "InclusiveMOESI");
    assert_eq!(config.directory_type, "infinite");
    assert_eq!(config.banks, 1);
    assert_eq!(config.interleaving, 64);
    assert_eq!(config.cores, 16);
    assert_eq!(config.block_size, 64);
    assert_eq!(config.skew_shift, 0);
    assert!(config.always_multicast);
    assert!(!config.local_directory);
    assert!(!config.migratory_optimization);
    assert!(config.validate().is_ok());
}

#[test]
fn pascal_case_options_are_read() {
    let json = r#"{
        "DirLatency": 5,
        "MAFSize": 4,
        "EvictBufferSize": 2,
        "DirectoryType": "std",
        "DirectoryConfig": "sets=64:assoc=4:repl=lru",
        "Banks": 2,
        "Interleaving": 128,
        "SkewShift": 16,
        "LocalDirectory": true,
        "AlwaysMulticast": false,
        "MigratoryOptimization": true
    }"#;
    let config: DirectoryConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.dir_latency, 5);
    assert_eq!(config.maf_size, 4);
    assert_eq!(config.evict_buffer_size, 2);
    assert_eq!(config.banks, 2);
    assert_eq!(config.interleaving, 128);
    assert_eq!(config.skew_shift, 16);
    assert!(config.local_directory);
    assert!(!config.always_multicast);
    assert!(config.migratory_optimization);
    assert_eq!(config.bank_info(1).name, "directory-bank1");
    assert!(config.validate().is_ok());
}

#[rstest]
#[case::zero_cores(r#"{"Cores": 0}"#)]
#[case::too_many_cores(r#"{"Cores": 513}"#)]
#[case::odd_block(r#"{"BlockSize": 48}"#)]
#[case::odd_banks(r#"{"Banks": 3}"#)]
#[case::narrow_interleave(r#"{"Interleaving": 32}"#)]
#[case::huge_skew(r#"{"SkewShift": 64}"#)]
#[case::tiny_queue(r#"{"QueueSize": 1}"#)]
#[case::no_maf(r#"{"MAFSize": 0}"#)]
#[case::no_evict_buffer(r#"{"EvictBufferSize": 0}"#)]
#[case::no_issue(r#"{"DirIssueLatency": 0}"#)]
#[case::bare_key(r#"{"DirectoryType": "std", "DirectoryConfig": "sets"}"#)]
#[case::repeated_key(r#"{"DirectoryType": "std", "DirectoryConfig": "assoc=2:assoc=4"}"#)]
fn rejects_invalid_configuration(#[case] json: &str) {
    let config: DirectoryConfig = serde_json::from_str(json).unwrap();
    assert!(matches!(config.validate(), Err(DirectoryError::InvalidConfig(_))), "{json} accepted");
}

#[rstest]
#[case::unknown_key("std", "ways=4")]
#[case::sets_not_power_of_two("std", "sets=24")]
#[case::both_set_counts("std", "sets=4:total_sets=8")]
#[case::bad_replacement("std", "repl=mru")]
#[case::region_below_block("region", "region_size=32")]
#[case::region_overflows_evict_buffer("region", "region_size=4096")]
#[case::infinite_takes_nothing("infinite", "sets=4")]
#[case::tagless_zero_buckets("tagless", "buckets=0")]
fn rejects_bad_directory_parameters(#[case] directory: &str, #[case] params: &str) {
    let mut config = config(directory, params);
    if directory == "tagless" {
        config.directory_policy = "Tagless".to_string();
    }
    let err = BankedController::new(config).unwrap_err();
    assert!(matches!(err, DirectoryError::InvalidConfig(_)), "{directory}:{params} gave {err}");
}

#[test]
fn parameter_keys_are_case_insensitive() {
    let params = DirectoryParams::parse(" Sets=64 : ASSOC=8 :skew=yes").unwrap();
    assert_eq!(params.power_of_two("sets").unwrap(), Some(64));
    assert_eq!(params.usize("assoc").unwrap(), Some(8));
    assert_eq!(params.flag("skew").unwrap(), Some(true));
    assert_eq!(params.get("repl"), None);
    assert!(params.ensure_only("std", &["sets", "assoc", "skew"]).is_ok());
    assert!(params.ensure_only("std", &["sets"]).is_err());
}

#[test]
fn empty_parameter_string_is_empty() {
    assert_eq!(DirectoryParams::parse("").unwrap(), DirectoryParams::default());
    assert_eq!(DirectoryParams::parse("::").unwrap(), DirectoryParams::default());
}

#[rstest]
#[case("fewest_sharers", ReplacementPolicy::FewestSharers)]
#[case("LRU", ReplacementPolicy::Lru)]
#[case("fifo", ReplacementPolicy::Fifo)]
#[case("random", ReplacementPolicy::Random)]
fn replacement_policy_names(#[case] name: &str, #[case] expected: ReplacementPolicy) {
    assert_eq!(ReplacementPolicy::from_name(name).unwrap(), expected);
}

#[test]
fn total_sets_are_split_across_banks() {
    let config = DirectoryConfig { banks: 4, ..config("std", "total_sets=64:assoc=2") };
    let controller = BankedController::new(config).unwrap();
    assert_eq!(controller.num_ports(), 4);
    let snapshot = controller.banks()[3].save_state();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["sets"], 16);
    assert_eq!(json["assoc"], 2);
}
