//! Directory bank.
//!
//! A bank is one independent shard of the coherence engine. It owns a
//! directory, a Miss Address File, an Evict Buffer, a protocol policy and six
//! bounded queues (`RequestIn/Out`, `SnoopIn/Out`, `ReplyIn/Out`). Each cycle it:
//! 1. **Retires:** Delivers the outputs of processes whose pipeline latency elapsed.
//! 2. **Schedules:** When the issue interval allows, picks one process in the fixed
//!    priority order Reply > Snoop > WakeMaf > Request > Evict > IdleWork. A process
//!    is only picked if its output space can be reserved up front.
//! 3. **Handles:** Runs the policy; a process parked in the MAF gives its reservation back.

use std::collections::VecDeque;

use tracing::{error, trace};

use crate::common::{DirectoryError, Result};
use crate::config::{BankInfo, DirectoryConfig, DirectoryParams};
use crate::directory::{BankSnapshot, Directory, DirectoryRegistry};
use crate::evict_buffer::EvictBuffer;
use crate::maf::MissAddressFile;
use crate::message::{Channel, Transport};
use crate::process::{ProcessEntry, ProcessType};
use crate::protocol::{BankContext, DirectoryPolicy, PolicyRegistry};
use crate::queue::MessageQueue;

/// Output slots a process may fill, per out queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Budget {
    /// SnoopOut slots.
    pub snoops: usize,
    /// ReplyOut slots.
    pub replies: usize,
    /// RequestOut slots.
    pub requests: usize,
}

impl Budget {
    /// Worst-case output of one process of type `kind`.
    ///
    /// A request may send one snoop, or one reply plus a write-back and a
    /// memory store. Completions emit nothing; drain work sends one snoop.
    pub const fn for_process(kind: ProcessType) -> Self {
        match kind {
            ProcessType::Reply => Self { snoops: 0, replies: 0, requests: 0 },
            ProcessType::Evict | ProcessType::IdleWork => Self { snoops: 1, replies: 0, requests: 0 },
            ProcessType::Request | ProcessType::WakeMaf | ProcessType::Snoop => {
                Self { snoops: 1, replies: 1, requests: 2 }
            }
        }
    }
}

#[derive(Debug)]
struct InFlight {
    ready: u64,
    budget: Budget,
    process: ProcessEntry,
}

/// One directory bank.
#[derive(Debug)]
pub struct DirectoryBank {
    ctx: BankContext,
    policy: DirectoryPolicy,
    request_in: MessageQueue<Transport>,
    snoop_in: MessageQueue<Transport>,
    reply_in: MessageQueue<Transport>,
    request_out: MessageQueue<Transport>,
    snoop_out: MessageQueue<Transport>,
    reply_out: MessageQueue<Transport>,
    pipeline: VecDeque<InFlight>,
    dir_latency: u64,
    issue_latency: u64,
    next_issue: u64,
}

impl DirectoryBank {
    /// Builds bank `bank` from the configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated engine configuration.
    /// * `bank` - Bank index.
    /// * `directories` - Registry resolving `DirectoryType`.
    /// * `policies` - Registry resolving `DirectoryPolicy`.
    pub fn new(
        config: &DirectoryConfig,
        bank: usize,
        directories: &DirectoryRegistry,
        policies: &PolicyRegistry,
    ) -> Result<Self> {
        let info = config.bank_info(bank);
        let params = DirectoryParams::parse(&config.directory_config)?;
        let directory = directories.build(&config.directory_type, &info, &params)?;
        if directory.eb_requirement() > config.evict_buffer_size {
            return Err(DirectoryError::InvalidConfig(format!(
                "EvictBufferSize {} cannot hold the {} entries one {} allocation may replace",
                config.evict_buffer_size,
                directory.eb_requirement(),
                directory.name()
            )));
        }
        let policy = policies.build(&config.directory_policy, &info, &directory)?;
        Ok(Self::with_parts(config, info, directory, policy))
    }

    /// Assembles a bank from an already built directory and policy.
    pub fn with_parts(config: &DirectoryConfig, info: BankInfo, directory: Directory, policy: DirectoryPolicy) -> Self {
        let size = config.queue_size;
        Self {
            ctx: BankContext::new(info, directory),
            policy,
            request_in: MessageQueue::new("RequestIn", size),
            snoop_in: MessageQueue::new("SnoopIn", size),
            reply_in: MessageQueue::new("ReplyIn", size),
            request_out: MessageQueue::new("RequestOut", size),
            snoop_out: MessageQueue::new("SnoopOut", size),
            reply_out: MessageQueue::new("ReplyOut", size),
            pipeline: VecDeque::new(),
            dir_latency: config.dir_latency,
            issue_latency: config.dir_issue_latency.max(1),
            next_issue: 0,
        }
    }

    /// Bank geometry and options.
    pub const fn info(&self) -> &BankInfo {
        &self.ctx.info
    }

    /// Directory storage.
    pub const fn directory(&self) -> &Directory {
        &self.ctx.directory
    }

    /// Miss Address File.
    pub const fn maf(&self) -> &MissAddressFile {
        &self.ctx.maf
    }

    /// Evict Buffer.
    pub const fn evict_buffer(&self) -> &EvictBuffer {
        &self.ctx.eb
    }

    /// Protocol policy.
    pub const fn policy(&self) -> &DirectoryPolicy {
        &self.policy
    }

    /// Number of processes between issue and retirement.
    pub fn in_flight(&self) -> usize {
        self.pipeline.len()
    }

    const fn input(&self, channel: Channel) -> &MessageQueue<Transport> {
        match channel {
            Channel::Request => &self.request_in,
            Channel::Snoop => &self.snoop_in,
            Channel::Reply => &self.reply_in,
        }
    }

    const fn input_mut(&mut self, channel: Channel) -> &mut MessageQueue<Transport> {
        match channel {
            Channel::Request => &mut self.request_in,
            Channel::Snoop => &mut self.snoop_in,
            Channel::Reply => &mut self.reply_in,
        }
    }

    const fn output_mut(&mut self, channel: Channel) -> &mut MessageQueue<Transport> {
        match channel {
            Channel::Request => &mut self.request_out,
            Channel::Snoop => &mut self.snoop_out,
            Channel::Reply => &mut self.reply_out,
        }
    }

    /// Returns true if the input queue for `channel` has a free slot.
    pub fn can_accept(&self, channel: Channel) -> bool {
        self.input(channel).has_space(1)
    }

    /// Queues an inbound message on the input queue of its channel.
    ///
    /// Callers check [`can_accept`](Self::can_accept) first.
    pub fn accept(&mut self, transport: Transport) -> Result<()> {
        self.input_mut(transport.channel()).push(transport)
    }

    /// Returns the oldest outbound message on `channel`.
    pub fn peek_output(&self, channel: Channel) -> Option<&Transport> {
        match channel {
            Channel::Request => self.request_out.peek(),
            Channel::Snoop => self.snoop_out.peek(),
            Channel::Reply => self.reply_out.peek(),
        }
    }

    /// Removes the oldest outbound message on `channel`.
    pub fn pop_output(&mut self, channel: Channel) -> Option<Transport> {
        self.output_mut(channel).pop()
    }

    fn has_output(&self, budget: Budget) -> bool {
        self.snoop_out.has_space(budget.snoops)
            && self.reply_out.has_space(budget.replies)
            && self.request_out.has_space(budget.requests)
    }

    fn reserve(&mut self, budget: Budget) -> Result<()> {
        self.snoop_out.reserve(budget.snoops)?;
        self.reply_out.reserve(budget.replies)?;
        self.request_out.reserve(budget.requests)
    }

    fn unreserve(&mut self, budget: Budget) {
        self.snoop_out.unreserve(budget.snoops);
        self.reply_out.unreserve(budget.replies);
        self.request_out.unreserve(budget.requests);
    }

    /// Picks the next process to issue, if any can run this cycle.
    fn select(&mut self) -> Option<ProcessEntry> {
        if !self.reply_in.is_empty() && self.has_output(Budget::for_process(ProcessType::Reply)) {
            return self.reply_in.pop().map(|t| ProcessEntry::new(ProcessType::Reply, t));
        }
        if !self.snoop_in.is_empty() && self.has_output(Budget::for_process(ProcessType::Snoop)) {
            return self.snoop_in.pop().map(|t| ProcessEntry::new(ProcessType::Snoop, t));
        }
        if let Some(waking) = self.ctx.maf.peek_waking()
            && self.has_output(Budget::for_process(ProcessType::WakeMaf))
            && self.policy.eb_has_space(&self.ctx, &waking.transport)
        {
            return self.ctx.maf.take_waking().map(|mut p| {
                p.kind = ProcessType::WakeMaf;
                p
            });
        }
        if let Some(request) = self.request_in.peek()
            && !self.ctx.maf.full()
            && self.has_output(Budget::for_process(ProcessType::Request))
            && self.policy.eb_has_space(&self.ctx, request)
        {
            return self.request_in.pop().map(|t| ProcessEntry::new(ProcessType::Request, t));
        }
        if self.policy.evict_work_required(&self.ctx)
            && self.has_output(Budget::for_process(ProcessType::Evict))
            && let Some(t) = self.policy.evict_block_transport(&self.ctx)
        {
            return Some(ProcessEntry::new(ProcessType::Evict, t));
        }
        if self.policy.has_idle_work_available(&self.ctx)
            && self.has_output(Budget::for_process(ProcessType::IdleWork))
            && let Some(t) = self.policy.evict_block_transport(&self.ctx)
        {
            return Some(ProcessEntry::new(ProcessType::IdleWork, t));
        }
        None
    }

    /// Advances the bank by one cycle.
    ///
    /// # Returns
    ///
    /// The first fatal protocol error; the bank must not be ticked again after one.
    pub fn tick(&mut self, cycle: u64) -> Result<()> {
        self.retire(cycle)?;
        if cycle < self.next_issue {
            return Ok(());
        }
        let Some(process) = self.select() else {
            return Ok(());
        };
        let budget = Budget::for_process(process.kind);
        self.reserve(budget)?;
        trace!(bank = self.ctx.info.bank, cycle, process = %process, "schedule");

        match self.policy.handle(&mut self.ctx, process) {
            Ok(Some(done)) => {
                let outbox = &done.outbox;
                if outbox.snoops.len() > budget.snoops
                    || outbox.replies.len() > budget.replies
                    || outbox.requests.len() > budget.requests
                {
                    let err = self.ctx.violation(done.transport.address, format!("{done} exceeded its output budget"));
                    error!(bank = self.ctx.info.bank, cycle, error = %err, "fatal");
                    return Err(err);
                }
                trace!(bank = self.ctx.info.bank, cycle, action = ?done.action, "handled");
                self.pipeline.push_back(InFlight { ready: cycle + self.dir_latency, budget, process: done });
            }
            Ok(None) => {
                trace!(bank = self.ctx.info.bank, cycle, "parked in MAF");
                self.unreserve(budget);
            }
            Err(err) => {
                error!(bank = self.ctx.info.bank, cycle, error = %err, "fatal");
                return Err(err);
            }
        }
        self.next_issue = cycle + self.issue_latency;
        Ok(())
    }

    fn retire(&mut self, cycle: u64) -> Result<()> {
        while let Some(front) = self.pipeline.front()
            && front.ready <= cycle
        {
            let Some(InFlight { budget, process, .. }) = self.pipeline.pop_front() else {
                break;
            };
            let bank = self.ctx.info.bank;
            deliver(bank, &mut self.snoop_out, process.outbox.snoops, budget.snoops)?;
            deliver(bank, &mut self.reply_out, process.outbox.replies, budget.replies)?;
            deliver(bank, &mut self.request_out, process.outbox.requests, budget.requests)?;
        }
        Ok(())
    }

    /// Returns true if the bank holds no work and no undelivered message.
    pub fn is_quiesced(&self) -> bool {
        self.policy.is_quiesced(&self.ctx)
            && self.pipeline.is_empty()
            && [&self.request_in, &self.snoop_in, &self.reply_in, &self.request_out, &self.snoop_out, &self.reply_out]
                .iter()
                .all(|q| q.is_empty())
    }

    /// Captures the directory contents.
    pub fn save_state(&self) -> BankSnapshot {
        BankSnapshot { bank: self.ctx.info.bank, directory: self.ctx.directory.save_state() }
    }

    /// Replaces the directory contents with `snapshot`.
    pub fn load_state(&mut self, snapshot: &BankSnapshot) -> Result<()> {
        let bank = self.ctx.info.bank;
        if snapshot.bank != bank {
            return Err(DirectoryError::SnapshotMismatch {
                bank,
                reason: format!("snapshot belongs to bank {}", snapshot.bank),
            });
        }
        if !self.is_quiesced() {
            return Err(DirectoryError::SnapshotMismatch { bank, reason: "bank is not quiesced".to_string() });
        }
        self.ctx.directory.load_state(bank, &snapshot.directory)
    }
}

fn deliver(bank: usize, queue: &mut MessageQueue<Transport>, messages: Vec<Transport>, reserved: usize) -> Result<()> {
    let sent = messages.len();
    for transport in messages {
        trace!(bank, queue = queue.name(), %transport, "send");
        queue.push_reserved(transport)?;
    }
    queue.unreserve(reserved.saturating_sub(sent));
    Ok(())
}
