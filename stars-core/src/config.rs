//! Peer configuration, loaded from a YAML file.
//!
//! Follows the loading pattern of the teacher's `NodeConfigManager`
//! (`config/mod.rs`): read the file, parse with `serde_yaml`, validate, log
//! a summary. Every key in spec.md §6's configuration table is a field here;
//! a parse or validation failure is always a [`ConfigError`], surfaced as
//! fatal at the process boundary (spec.md §6's exit-code rule).

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

/// Which availability-summary policy a peer runs. All peers in one overlay
/// tree must agree (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Policy {
    Ib,
    Mm,
    Dp,
    Fsp,
}

/// Raw YAML shape; validated and normalized into [`Config`] by
/// [`Config::load_from_file`].
#[derive(Debug, Deserialize)]
struct ConfigFile {
    port: u16,
    update_bw: u64,
    slowness_ratio: f64,
    mmp_beta: f64,
    heartbeat: u64,
    submit_retries: u32,
    avail_mem: u64,
    avail_disk: u64,
    policy: Policy,
    #[serde(default = "default_aggregation_clusters")]
    aggregation_clusters: u32,
    request_timeout: u64,
    /// Factor the submission manager widens a timed-out request's deadline
    /// span by on each retry (spec.md §4.4's "configurable multiplier").
    #[serde(default = "default_deadline_multiplier")]
    deadline_multiplier: f64,
}

fn default_aggregation_clusters() -> u32 {
    64
}

fn default_deadline_multiplier() -> f64 {
    2.0
}

/// Validated peer configuration — one instance per peer process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Peer listen port.
    pub port: u16,
    /// Bytes/sec cap on upward availability updates (spec.md §4.5).
    pub update_bw: u64,
    /// FSP's `β`: limit multiplier vs. current worst slowness.
    pub slowness_ratio: f64,
    /// MM's target-queue-end multiplier, must lie in `(0, 1]`.
    pub mmp_beta: f64,
    /// Seconds between executor→submitter heartbeats.
    pub heartbeat: u64,
    /// Max automatic re-requests on search timeout.
    pub submit_retries: u32,
    /// Leaf-advertised free memory, MB.
    pub avail_mem: u64,
    /// Leaf-advertised free disk, MB.
    pub avail_disk: u64,
    pub policy: Policy,
    /// `K`, the per-summary cluster budget; must be `>= 4`.
    pub aggregation_clusters: u32,
    /// Seconds a Request stays `Searching` before cancel + retry.
    pub request_timeout: u64,
    /// Deadline-span widening factor applied by the submission manager's
    /// retry policy (spec.md §4.4).
    pub deadline_multiplier: f64,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if the YAML is structurally invalid, [`ConfigError::Invalid`] if the
    /// values violate a documented constraint (e.g. `mmp_beta` out of
    /// range, `aggregation_clusters < 4`).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let file: ConfigFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let config = Config::from(file);
        config.validate()?;

        info!(
            policy = ?config.policy,
            port = config.port,
            aggregation_clusters = config.aggregation_clusters,
            "configuration loaded"
        );

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.mmp_beta && self.mmp_beta <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "mmp_beta must be in (0, 1], got {}",
                self.mmp_beta
            )));
        }
        if self.aggregation_clusters < 4 {
            return Err(ConfigError::Invalid(format!(
                "aggregation_clusters must be >= 4, got {}",
                self.aggregation_clusters
            )));
        }
        if self.slowness_ratio <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "slowness_ratio must be positive, got {}",
                self.slowness_ratio
            )));
        }
        if self.deadline_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "deadline_multiplier must exceed 1.0, got {}",
                self.deadline_multiplier
            )));
        }
        Ok(())
    }
}

impl From<ConfigFile> for Config {
    fn from(f: ConfigFile) -> Self {
        Config {
            port: f.port,
            update_bw: f.update_bw,
            slowness_ratio: f.slowness_ratio,
            mmp_beta: f.mmp_beta,
            heartbeat: f.heartbeat,
            submit_retries: f.submit_retries,
            avail_mem: f.avail_mem,
            avail_disk: f.avail_disk,
            policy: f.policy,
            aggregation_clusters: f.aggregation_clusters,
            request_timeout: f.request_timeout,
            deadline_multiplier: f.deadline_multiplier,
        }
    }
}
