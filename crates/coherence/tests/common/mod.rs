//! Shared helpers for the engine tests.


use std::sync::Once;

use dirsim_core::{CacheState, DirectoryConfig, MemoryAddress, MessageKind, NodeId};
use proptest::prelude::*;

pub use harness::Harness;

static TRACING: Once = Once::new();

/// Routes engine logs to the test writer. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Block `n` of the default 64-byte geometry.
pub const fn block(n: u64) -> MemoryAddress {
    MemoryAddress::new(n * 64)
}

/// Single-bank configuration over `directory_type` with `params`.
pub fn config(directory_type: &str, params: &str) -> DirectoryConfig {
    DirectoryConfig {
        directory_type: directory_type.to_string(),
        directory_config: params.to_string(),
        cores: 8,
        dir_latency: 2,
        ..DirectoryConfig::default()
    }
}

/// Single-bank tagless configuration.
pub fn tagless_config(params: &str) -> DirectoryConfig {
    DirectoryConfig { directory_policy: "Tagless".to_string(), ..config("tagless", params) }
}

/// A processor action for randomized runs.
#[derive(Clone, Copy, Debug)]
pub enum Op {
    Read(NodeId, u64),
    Fetch(NodeId, u64),
    Write(NodeId, u64),
    Upgrade(NodeId, u64),
    Store(NodeId, u64),
    Evict(NodeId, u64),
}

/// Random actions by `nodes` nodes over `blocks` blocks.
pub fn ops(nodes: usize, blocks: u64, len: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = (0u8..6, 0..nodes, 0..blocks).prop_map(|(k, n, b)| match k {
        0 => Op::Read(n, b),
        1 => Op::Fetch(n, b),
        2 => Op::Write(n, b),
        3 => Op::Upgrade(n, b),
        4 => Op::Store(n, b),
        _ => Op::Evict(n, b),
    });
    prop::collection::vec(op, 1..len)
}

/// Issues `op` the way a cache would and runs to quiescence.
///
/// Upgrades are only sent by Shared holders; other nodes read instead.
pub fn apply(h: &mut Harness, op: Op) {
    match op {
        Op::Read(n, b) => h.request(MessageKind::Read, block(b), n),
        Op::Fetch(n, b) => h.request(MessageKind::Fetch, block(b), n),
        Op::Write(n, b) => h.request(MessageKind::Write, block(b), n),
        Op::Upgrade(n, b) if h.state(n, block(b)) == CacheState::Shared => {
            h.request(MessageKind::Upgrade, block(b), n);
        }
        Op::Upgrade(n, b) => h.request(MessageKind::Read, block(b), n),
        Op::Store(n, b) => h.request(MessageKind::NonAllocatingStore, block(b), n),
        Op::Evict(n, b) => {
            if h.evict(block(b), n) {
                let _ = h.settle();
            }
        }
    }
}
