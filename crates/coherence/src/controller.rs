//! Banked directory controller.
//!
//! The controller shards the address space over `Banks` independent
//! [`DirectoryBank`]s and exposes one port per bank to the surrounding
//! simulation. This module provides:
//! 1. **Routing:** `map_incoming` picks the bank for an inbound message and
//!    `map_outgoing` the port for an outbound one. Both are pure functions of
//!    the address (or requester) and the configuration.
//! 2. **Cycle Driver:** `process_messages` moves port traffic into the banks,
//!    ticks every bank once and moves bank output back to the ports.
//! 3. **Checkpoints:** Per-bank JSON snapshots under a directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::bank::DirectoryBank;
use crate::common::{DirectoryError, MemoryAddress, Result};
use crate::config::DirectoryConfig;
use crate::directory::{BankSnapshot, DirectoryRegistry};
use crate::message::{Channel, Transport};
use crate::protocol::PolicyRegistry;
use crate::queue::MessageQueue;

const CHANNELS: [Channel; 3] = [Channel::Reply, Channel::Snoop, Channel::Request];

/// One queue per channel.
#[derive(Debug)]
struct ChannelQueues {
    request: MessageQueue<Transport>,
    snoop: MessageQueue<Transport>,
    reply: MessageQueue<Transport>,
}

impl ChannelQueues {
    fn new(names: [&'static str; 3], size: usize) -> Self {
        Self {
            request: MessageQueue::new(names[0], size),
            snoop: MessageQueue::new(names[1], size),
            reply: MessageQueue::new(names[2], size),
        }
    }

    const fn get(&self, channel: Channel) -> &MessageQueue<Transport> {
        match channel {
            Channel::Request => &self.request,
            Channel::Snoop => &self.snoop,
            Channel::Reply => &self.reply,
        }
    }

    const fn get_mut(&mut self, channel: Channel) -> &mut MessageQueue<Transport> {
        match channel {
            Channel::Request => &mut self.request,
            Channel::Snoop => &mut self.snoop,
            Channel::Reply => &mut self.reply,
        }
    }

    fn is_empty(&self) -> bool {
        self.request.is_empty() && self.snoop.is_empty() && self.reply.is_empty()
    }
}

#[derive(Debug)]
struct Port {
    inbound: ChannelQueues,
    outbound: ChannelQueues,
}

/// Directory controller made of independent banks.
#[derive(Debug)]
pub struct BankedController {
    config: DirectoryConfig,
    directories: DirectoryRegistry,
    policies: PolicyRegistry,
    banks: Vec<DirectoryBank>,
    ports: Vec<Port>,
    cycle: u64,
    next_port: usize,
}

impl BankedController {
    /// Builds a controller with the built-in directories and policies.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        Self::with_registries(config, DirectoryRegistry::with_builtin(), PolicyRegistry::with_builtin())
    }

    /// Builds a controller resolving names through the given registries.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration; validated here.
    /// * `directories` - Registry resolving `DirectoryType`.
    /// * `policies` - Registry resolving `DirectoryPolicy`.
    pub fn with_registries(
        config: DirectoryConfig,
        directories: DirectoryRegistry,
        policies: PolicyRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let banks = (0..config.banks)
            .map(|b| DirectoryBank::new(&config, b, &directories, &policies))
            .collect::<Result<Vec<_>>>()?;
        let ports = (0..config.banks)
            .map(|_| Port {
                inbound: ChannelQueues::new(["PortRequestIn", "PortSnoopIn", "PortReplyIn"], config.queue_size),
                outbound: ChannelQueues::new(["PortRequestOut", "PortSnoopOut", "PortReplyOut"], config.queue_size),
            })
            .collect();
        info!(
            banks = config.banks,
            policy = %config.directory_policy,
            directory = %config.directory_type,
            params = %config.directory_config,
            "directory controller built"
        );
        Ok(Self { config, directories, policies, banks, ports, cycle: 0, next_port: 0 })
    }

    /// Active configuration.
    pub const fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Number of `process_messages` calls so far.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// All banks in index order.
    pub fn banks(&self) -> &[DirectoryBank] {
        &self.banks
    }

    /// Number of ports, one per bank.
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// Bank owning `address` under the interleaving and skew configuration.
    pub fn home_bank(&self, address: MemoryAddress) -> usize {
        let a = address.val();
        let bank_shift = self.config.interleaving.trailing_zeros();
        let hashed = if self.config.skew_shift > 0 {
            (a >> bank_shift) ^ (a >> self.config.skew_shift)
        } else {
            a >> bank_shift
        };
        (hashed & (self.config.banks as u64 - 1)) as usize
    }

    /// Bank servicing an inbound message that arrived on port `index`.
    pub fn map_incoming(&self, transport: &Transport, index: usize) -> usize {
        if self.config.local_directory { self.home_bank(transport.address) } else { index % self.banks.len() }
    }

    /// Port carrying an outbound message produced by bank `index`.
    pub fn map_outgoing(&self, transport: &Transport, index: usize) -> usize {
        if self.config.local_directory { transport.requester % self.ports.len() } else { index }
    }

    fn port_error(&self, port: usize) -> DirectoryError {
        DirectoryError::InvalidConfig(format!("port {port} out of range for {} ports", self.ports.len()))
    }

    /// Returns true if port `port` can take one more message on `channel`.
    pub fn can_accept(&self, port: usize, channel: Channel) -> bool {
        self.ports.get(port).is_some_and(|p| p.inbound.get(channel).has_space(1))
    }

    /// Delivers an inbound message to port `port`.
    ///
    /// The address is block-aligned on entry. Callers check
    /// [`can_accept`](Self::can_accept) first; pushing into a full port is an error.
    pub fn push(&mut self, port: usize, mut transport: Transport) -> Result<()> {
        let width = self.config.cores;
        for node in [transport.requester, transport.source] {
            if node >= width {
                return Err(DirectoryError::SharerOutOfRange { index: node, width });
            }
        }
        transport.address = transport.address.block_aligned(self.config.block_size);
        let channel = transport.channel();
        let err = self.port_error(port);
        self.ports.get_mut(port).ok_or(err)?.inbound.get_mut(channel).push(transport)
    }

    /// Removes the oldest outbound message of `channel` on port `port`.
    pub fn pop_outgoing(&mut self, port: usize, channel: Channel) -> Option<Transport> {
        self.ports.get_mut(port)?.outbound.get_mut(channel).pop()
    }

    /// Removes every outbound message, port by port, snoops before replies before memory traffic.
    pub fn drain_outgoing(&mut self) -> Vec<Transport> {
        let mut out = Vec::new();
        for port in &mut self.ports {
            for channel in [Channel::Snoop, Channel::Reply, Channel::Request] {
                out.extend(port.outbound.get_mut(channel).drain());
            }
        }
        out
    }

    /// Runs one cycle.
    ///
    /// # Returns
    ///
    /// The first fatal error raised by any bank.
    pub fn process_messages(&mut self) -> Result<()> {
        let ports = self.ports.len();
        for step in 0..ports {
            let port = (self.next_port + step) % ports;
            for channel in CHANNELS {
                while let Some(t) = self.ports[port].inbound.get(channel).peek() {
                    let bank = self.map_incoming(t, port);
                    if !self.banks[bank].can_accept(channel) {
                        break;
                    }
                    let Some(t) = self.ports[port].inbound.get_mut(channel).pop() else {
                        break;
                    };
                    self.banks[bank].accept(t)?;
                }
            }
        }
        self.next_port = (self.next_port + 1) % ports;

        for bank in &mut self.banks {
            bank.tick(self.cycle)?;
        }

        for b in 0..self.banks.len() {
            for channel in CHANNELS {
                while let Some(t) = self.banks[b].peek_output(channel) {
                    let port = self.map_outgoing(t, b);
                    if !self.ports[port].outbound.get(channel).has_space(1) {
                        break;
                    }
                    if let Some(t) = self.banks[b].pop_output(channel) {
                        self.ports[port].outbound.get_mut(channel).push(t)?;
                    }
                }
            }
        }
        self.cycle += 1;
        Ok(())
    }

    /// Returns true if every bank and port is idle.
    pub fn is_quiesced(&self) -> bool {
        self.banks.iter().all(DirectoryBank::is_quiesced)
            && self.ports.iter().all(|p| p.inbound.is_empty() && p.outbound.is_empty())
    }

    /// Path of bank `bank`'s snapshot under `dir`.
    pub fn snapshot_path(dir: &Path, bank: usize) -> PathBuf {
        dir.join(format!("directory-bank{bank}.json"))
    }

    /// Writes one snapshot file per bank into `dir`, creating it if needed.
    pub fn save_state(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for bank in &self.banks {
            let snapshot = bank.save_state();
            let path = Self::snapshot_path(dir, snapshot.bank);
            fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
            info!(bank = snapshot.bank, kind = snapshot.directory.kind(), path = %path.display(), "saved directory state");
        }
        Ok(())
    }

    /// Restores every bank from the snapshot files in `dir`.
    ///
    /// A bank without a snapshot file is reset to an empty directory.
    pub fn load_state(&mut self, dir: &Path) -> Result<()> {
        for b in 0..self.banks.len() {
            let path = Self::snapshot_path(dir, b);
            if !path.exists() {
                warn!(bank = b, path = %path.display(), "no directory snapshot, starting empty");
                self.banks[b] = DirectoryBank::new(&self.config, b, &self.directories, &self.policies)?;
                continue;
            }
            let snapshot: BankSnapshot = serde_json::from_str(&fs::read_to_string(&path)?)?;
            self.banks[b].load_state(&snapshot)?;
            info!(bank = b, path = %path.display(), "loaded directory state");
        }
        Ok(())
    }
}
