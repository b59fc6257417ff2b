//! Directory coherence engine CLI.
//!
//! This binary drives a [`BankedController`] from JSON files. It performs:
//! 1. **Scenario run:** Inject a list of inbound messages, tick the controller
//!    until it is quiescent and print every outbound message with its cycle.
//! 2. **Checkpoints:** Restore the directories before the run and save them
//!    after it.
//! 3. **Config check:** Build every bank from a configuration and report its
//!    geometry without running anything.
//!
//! Logging goes through `tracing`; set `RUST_LOG=dirsim_core=trace` to see
//! every scheduled process.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{fs, mem};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dirsim_core::message::Channel;
use dirsim_core::{BankedController, DirectoryConfig, MemoryAddress, MessageKind, NodeId, Transport};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "dirsim",
    author,
    version,
    about = "Directory cache-coherence engine",
    long_about = "Run a scenario of cache messages through a banked coherence directory.\n\nExamples:\n  dirsim run --config dir.json scenario.json\n  dirsim run scenario.json --load ckpt/ --save ckpt/\n  dirsim check --config dir.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario until the directory is quiescent.
    Run {
        /// Scenario file: a JSON array of inbound messages.
        scenario: PathBuf,

        /// Directory configuration (JSON, PascalCase keys). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many cycles.
        #[arg(long, default_value_t = 100_000)]
        max_cycles: u64,

        /// Restore directory snapshots from this directory before running.
        #[arg(long)]
        load: Option<PathBuf>,

        /// Write directory snapshots to this directory after running.
        #[arg(long)]
        save: Option<PathBuf>,

        /// Print outbound messages as JSON lines.
        #[arg(long)]
        json: bool,

        /// Print every directory entry after the run.
        #[arg(long)]
        dump: bool,
    },

    /// Build the configured banks and print their geometry.
    Check {
        /// Directory configuration (JSON, PascalCase keys).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// One inbound message of a scenario file.
///
/// `node` sends the message. For snoop responses `requester` names the node
/// whose transaction is being answered; it defaults to `node` otherwise.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioMessage {
    kind: MessageKind,
    address: u64,
    node: NodeId,
    #[serde(default)]
    requester: Option<NodeId>,
    #[serde(default)]
    has_data: bool,
    #[serde(default)]
    dirty: bool,
    /// Earliest cycle at which the message is offered to the controller.
    #[serde(default)]
    at: u64,
    /// Port to push on; the address's home bank when omitted.
    #[serde(default)]
    port: Option<usize>,
}

impl ScenarioMessage {
    fn transport(&self) -> Transport {
        let address = MemoryAddress::new(self.address);
        if self.kind.is_snoop_response() {
            let requester = self.requester.unwrap_or(self.node);
            Transport::snoop_response(self.kind, address, requester, self.node, self.has_data, self.dirty)
        } else {
            Transport { has_data: self.has_data, dirty: self.dirty, ..Transport::new(self.kind, address, self.node) }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { scenario, config, max_cycles, load, save, json, dump } => {
            cmd_run(&scenario, config.as_deref(), max_cycles, load.as_deref(), save.as_deref(), json, dump)
        }
        Commands::Check { config } => cmd_check(config.as_deref()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<DirectoryConfig> {
    let Some(path) = path else {
        return Ok(DirectoryConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text).map_err(|e| format!("parsing {}: {e}", path.display()))?)
}

/// Runs a scenario to quiescence and prints the outbound traffic.
///
/// Messages are offered in file order; one that cannot be accepted yet holds
/// back every later message on the same port and channel.
///
/// # Arguments
///
/// * `scenario` - JSON array of [`ScenarioMessage`]s.
/// * `config` - Optional configuration file.
/// * `max_cycles` - Cycle limit; reaching it is an error.
/// * `load` / `save` - Optional snapshot directories.
/// * `json` - Print outbound messages as JSON lines instead of text.
/// * `dump` - Print the directory contents after the run.
fn cmd_run(
    scenario: &Path,
    config: Option<&Path>,
    max_cycles: u64,
    load: Option<&Path>,
    save: Option<&Path>,
    json: bool,
    dump: bool,
) -> CliResult<()> {
    let config = load_config(config)?;
    let text = fs::read_to_string(scenario).map_err(|e| format!("reading {}: {e}", scenario.display()))?;
    let messages: Vec<ScenarioMessage> =
        serde_json::from_str(&text).map_err(|e| format!("parsing {}: {e}", scenario.display()))?;

    let mut controller = BankedController::new(config)?;
    if let Some(dir) = load {
        controller.load_state(dir)?;
    }
    info!(messages = messages.len(), "scenario loaded");

    let mut pending = Vec::with_capacity(messages.len());
    for (i, m) in messages.iter().enumerate() {
        let t = m.transport();
        let port = m.port.unwrap_or_else(|| controller.home_bank(t.address));
        if port >= controller.num_ports() {
            return Err(format!("message {i}: port {port} out of range for {} ports", controller.num_ports()).into());
        }
        pending.push((port, t, m.at));
    }
    let mut sent = 0usize;

    while !pending.is_empty() || !controller.is_quiesced() {
        let cycle = controller.cycle();
        if cycle >= max_cycles {
            return Err(format!("not quiescent after {max_cycles} cycles, {} messages undelivered", pending.len()).into());
        }

        let mut blocked: Vec<(usize, Channel)> = Vec::new();
        for (port, t, at) in mem::take(&mut pending) {
            let lane = (port, t.channel());
            if at > cycle || blocked.contains(&lane) || !controller.can_accept(port, lane.1) {
                blocked.push(lane);
                pending.push((port, t, at));
                continue;
            }
            controller.push(port, t)?;
        }

        controller.process_messages()?;
        for t in controller.drain_outgoing() {
            sent += 1;
            if json {
                println!("{}", serde_json::to_string(&t)?);
            } else {
                println!("{cycle:>6}  {t}");
            }
        }
    }
    info!(cycles = controller.cycle(), sent, "scenario complete");

    if dump {
        for bank in controller.banks() {
            for entry in bank.directory().entries() {
                println!("bank {}  {entry}", bank.info().bank);
            }
        }
    }
    if let Some(dir) = save {
        controller.save_state(dir)?;
    }
    Ok(())
}

/// Builds the controller and prints one line per bank.
fn cmd_check(config: Option<&Path>) -> CliResult<()> {
    let config = load_config(config)?;
    let controller = BankedController::new(config)?;
    let c = controller.config();
    println!(
        "{} banks, policy {}, directory {} ({}), {} cores, {}-byte blocks",
        c.banks,
        c.directory_policy,
        c.directory_type,
        if c.directory_config.is_empty() { "defaults" } else { c.directory_config.as_str() },
        c.cores,
        c.block_size
    );
    for bank in controller.banks() {
        let directory = bank.directory();
        let tracked = directory.occupancy().map_or_else(|| "approximate".to_string(), |n| format!("{n} entries"));
        println!(
            "  bank {}: {} storage, {} policy, {} per Evict Buffer allocation, {tracked}",
            bank.info().bank,
            directory.name(),
            bank.policy().name(),
            directory.eb_requirement(),
        );
    }
    Ok(())
}
