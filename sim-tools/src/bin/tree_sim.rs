// SPDX-License-Identifier: MIT

//! Wires a three-peer tree (one dispatcher, two leaves) over
//! `ChannelTransport`, submits one bag-of-tasks application at the root,
//! and lets it run long enough to observe the full
//! dispatch → accept → finish → heartbeat cycle in the logs.
//!
//! Not a benchmark, not a test harness with assertions — a manual
//! "does the tree actually route tasks" exercise, mirroring the role the
//! teacher's `test-tools` binaries played for Timpani-N/Timpani-O.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sim_tools::transport::{ChannelTransport, Routes};
use stars_core::address::Address;
use stars_core::config::{Config, Policy};
use stars_core::envelope::{DispatchCommandMsg, Envelope};
use stars_core::overlay::StaticOverlay;
use stars_core::peer::Peer;
use stars_core::task::TaskDescription;
use stars_core::time::Time;
use stars_core::transport::Event;
use stars_core::zone::ZoneDescription;

#[derive(Parser)]
#[command(name = "tree-sim", about = "Drive a 3-peer STaRS tree by hand")]
struct Cli {
    /// Seconds the tree keeps running after the application is submitted.
    #[arg(long, default_value_t = 3)]
    run_seconds: u64,

    /// Number of tasks in the submitted bag.
    #[arg(long, default_value_t = 4)]
    num_tasks: u32,

    /// Compute units per task.
    #[arg(long, default_value_t = 2_000)]
    task_length: u64,
}

fn config(policy: Policy) -> Config {
    Config {
        port: 9000,
        update_bw: 1_000_000,
        slowness_ratio: 1.5,
        mmp_beta: 0.9,
        heartbeat: 5,
        submit_retries: 3,
        avail_mem: 4_096,
        avail_disk: 8_192,
        policy,
        aggregation_clusters: 64,
        request_timeout: 10,
        deadline_multiplier: 2.0,
    }
}

fn addr(last: u8) -> Address {
    Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let root = addr(1);
    let left = addr(2);
    let right = addr(3);

    let (routes, mut receivers) = Routes::build(&[root, left, right]);
    let root_rx = receivers.remove(0);
    let left_rx = receivers.remove(0);
    let right_rx = receivers.remove(0);

    let (root_transport, root_shutdown) = ChannelTransport::new(root, routes.clone(), root_rx);
    let (left_transport, left_shutdown) = ChannelTransport::new(left, routes.clone(), left_rx);
    let (right_transport, right_shutdown) = ChannelTransport::new(right, routes.clone(), right_rx);

    let left_zone = ZoneDescription::singleton(left);
    let right_zone = ZoneDescription::singleton(right);
    let root_zone = left_zone.aggregate(&right_zone);
    let root_overlay = StaticOverlay::interior(None, (left, true), (right, true), left_zone, right_zone, root_zone);
    let left_overlay = StaticOverlay::leaf(Some(root), left);
    let right_overlay = StaticOverlay::leaf(Some(root), right);

    let mut root_peer = Peer::new_dispatcher(root, config(Policy::Ib), root_overlay, root_transport, 500);
    root_peer.register_app(
        "render",
        Arc::new(TaskDescription {
            min_memory_mb: 64,
            min_disk_mb: 32,
            num_tasks: cli.num_tasks,
            length: cli.task_length,
            input_bytes: 0,
            output_bytes: 0,
            deadline: Time::from_micros(0), // overwritten per-instance by DispatchCommand
        }),
    )?;

    let mut left_peer = Peer::new_leaf(left, config(Policy::Ib), left_overlay, left_transport, 4.0);
    let mut right_peer = Peer::new_leaf(right, config(Policy::Ib), right_overlay, right_transport, 2.0);

    info!("tree assembled: root {root} / left {left} / right {right}");

    let root_handle = thread::spawn(move || root_peer.run());
    let left_handle = thread::spawn(move || left_peer.run());
    let right_handle = thread::spawn(move || right_peer.run());

    // Submit by pushing a local-only DispatchCommand straight into the
    // root's own channel — exactly what `Peer::handle_envelope` expects to
    // receive, just injected from outside instead of from the wire.
    let root_sender = routes.sender(root).expect("root route exists");
    let deadline = Time::from_micros(1_000_000_000);
    root_sender.send(Event::Message(Envelope::DispatchCommand(DispatchCommandMsg {
        app_name: "render".to_string(),
        deadline,
    })))?;

    thread::sleep(StdDuration::from_secs(cli.run_seconds));

    root_shutdown.signal();
    left_shutdown.signal();
    right_shutdown.signal();
    let _ = root_handle.join();
    let _ = left_handle.join();
    let _ = right_handle.join();

    info!("simulation finished");
    Ok(())
}
