//! STaRS peer process entry point.
//!
//! Thin by design: parse arguments, load configuration, build the one
//! `Peer` this process runs, and hand it the event loop. Everything that
//! matters lives in `stars-core` — this binary only wires it up, exactly
//! the role the teacher's own node binaries played.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stars_core::config::Config;
use stars_core::peer::Peer;
use stars_core::transport::LoopbackTransport;

mod topology;

use topology::{Role, Topology};

#[derive(Parser)]
#[command(name = "stars-peer", version, about = "STaRS scheduling peer")]
struct Cli {
    /// Scheduling configuration (spec.md §6's configuration table).
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// This peer's fixed position in the overlay tree.
    #[arg(long, default_value = "topology.yaml")]
    topology: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)?;
    let topology = Topology::load(&cli.topology)?;

    info!(
        own = %topology.own_addr,
        role = ?topology.role,
        policy = ?config.policy,
        "starting peer"
    );

    // A production deployment supplies its own network-backed Transport
    // (spec.md §1/§4.7); none ships in this crate, so a single-process peer
    // runs against its own loopback queue.
    let transport = LoopbackTransport::new();

    let mut peer = match topology.role {
        Role::Leaf => Peer::new_leaf(
            topology.own_addr,
            config,
            topology.overlay,
            transport,
            topology.power,
        ),
        Role::Dispatcher => Peer::new_dispatcher(
            topology.own_addr,
            config,
            topology.overlay,
            transport,
            topology.one_task_time_us,
        ),
    };

    peer.run();
    Ok(())
}
