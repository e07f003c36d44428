//! Static overlay topology for one peer, loaded from a YAML file.
//!
//! Overlay construction and repair are out of scope (spec.md §1) — this
//! module only parses the fixed tree position a production deployment would
//! otherwise learn from its own repair protocol, and turns it into the
//! `StaticOverlay` the library ships for exactly this purpose.

use std::net::SocketAddrV4;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use stars_core::address::Address;
use stars_core::overlay::StaticOverlay;
use stars_core::zone::ZoneDescription;

fn parse_addr(s: &str) -> Result<Address> {
    let sock: SocketAddrV4 = s
        .parse()
        .with_context(|| format!("invalid address {s:?}, expected ip:port"))?;
    Ok(Address::new(*sock.ip(), sock.port()))
}

#[derive(Debug, Deserialize)]
struct ZoneConfig {
    min: String,
    max: String,
    #[serde(default)]
    nodes: u32,
}

impl ZoneConfig {
    fn to_zone(&self) -> Result<ZoneDescription> {
        Ok(ZoneDescription::new(
            parse_addr(&self.min)?,
            parse_addr(&self.max)?,
            self.nodes,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ChildConfig {
    addr: String,
    is_leaf: bool,
    zone: ZoneConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leaf,
    Dispatcher,
}

/// Raw YAML shape. Which optional fields are required depends on `role`,
/// validated by [`TopologyFile::load`] rather than by the deserializer —
/// the same pattern `stars_core::config::Config` uses for its own
/// cross-field constraints.
#[derive(Debug, Deserialize)]
struct TopologyFile {
    own: String,
    father: Option<String>,
    role: Role,
    /// Leaf-only: compute units/microsecond this host offers (spec.md §3).
    power: Option<f64>,
    /// Dispatcher-only: fixed per-task dispatch overhead (spec.md §4.2).
    one_task_time_us: Option<u64>,
    left: Option<ChildConfig>,
    right: Option<ChildConfig>,
    zone: Option<ZoneConfig>,
}

/// A peer's resolved position in the tree, ready to hand to
/// `Peer::new_leaf`/`Peer::new_dispatcher`.
pub struct Topology {
    pub own_addr: Address,
    pub role: Role,
    pub overlay: StaticOverlay,
    pub power: f64,
    pub one_task_time_us: u64,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading topology file {}", path.display()))?;
        let file: TopologyFile = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing topology file {}", path.display()))?;

        let own_addr = parse_addr(&file.own)?;
        let father = file.father.as_deref().map(parse_addr).transpose()?;

        let overlay = match file.role {
            Role::Leaf => StaticOverlay::leaf(father, own_addr),
            Role::Dispatcher => {
                let left = file
                    .left
                    .as_ref()
                    .context("dispatcher role requires a `left` child")?;
                let right = file
                    .right
                    .as_ref()
                    .context("dispatcher role requires a `right` child")?;
                let zone = file
                    .zone
                    .as_ref()
                    .context("dispatcher role requires its own `zone`")?;
                StaticOverlay::interior(
                    father,
                    (parse_addr(&left.addr)?, left.is_leaf),
                    (parse_addr(&right.addr)?, right.is_leaf),
                    left.zone.to_zone()?,
                    right.zone.to_zone()?,
                    zone.to_zone()?,
                )
            }
        };

        let power = match file.role {
            Role::Leaf => file.power.context("leaf role requires `power`")?,
            Role::Dispatcher => 0.0,
        };
        let one_task_time_us = match file.role {
            Role::Dispatcher => file
                .one_task_time_us
                .context("dispatcher role requires `one_task_time_us`")?,
            Role::Leaf => 0,
        };

        Ok(Topology {
            own_addr,
            role: file.role,
            overlay,
            power,
            one_task_time_us,
        })
    }
}
