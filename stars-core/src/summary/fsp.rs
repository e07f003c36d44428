//! FSP (fair scheduling, slowness) availability summary: a piecewise
//! description of `slowness(a, tpn)` per cluster, plus subtree-wide
//! min/max reachable slowness and the slowest-machine slowness — spec.md
//! §3/§4.3.
//!
//! Each cluster samples `Z(a, tpn)` at `tpn = 1..=table.len()`; beyond the
//! table the function is extrapolated linearly using the slope between the
//! last two samples, which keeps the representation bounded in size while
//! staying nondecreasing and piecewise linear as spec.md §4.3 requires.

use serde::{Deserialize, Serialize};

use super::cluster::{self, Clusterable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FspCluster {
    pub mem_min: u64,
    pub mem_max: u64,
    pub disk_min: u64,
    pub disk_max: u64,
    /// `zvalues[i]` is `Z(a, i + 1)`; nondecreasing by construction of the
    /// underlying schedule.
    zvalues: Vec<f64>,
    pub count: u32,
}

impl FspCluster {
    pub fn new(mem: u64, disk: u64, zvalues: Vec<f64>, count: u32) -> Self {
        assert!(!zvalues.is_empty(), "a cluster must sample at least tpn=1");
        FspCluster {
            mem_min: mem,
            mem_max: mem,
            disk_min: disk,
            disk_max: disk,
            zvalues,
            count,
        }
    }

    pub fn satisfies(&self, min_memory_mb: u64, min_disk_mb: u64) -> bool {
        self.mem_min >= min_memory_mb && self.disk_min >= min_disk_mb
    }

    /// Slowness this cluster would exhibit granted `tpn` tasks (`tpn >= 1`).
    /// Extrapolates linearly past the sampled table using the slope of the
    /// last segment (flat if only one sample exists).
    pub fn z(&self, tpn: u32) -> f64 {
        let idx = (tpn.max(1) - 1) as usize;
        if idx < self.zvalues.len() {
            self.zvalues[idx]
        } else {
            let last = *self.zvalues.last().unwrap();
            let slope = if self.zvalues.len() >= 2 {
                let n = self.zvalues.len();
                self.zvalues[n - 1] - self.zvalues[n - 2]
            } else {
                0.0
            };
            let extra = (idx - (self.zvalues.len() - 1)) as f64;
            last + slope * extra
        }
    }

    /// Marginal slowness cost of placing one more task, moving from `tpn`
    /// to `tpn + 1`.
    pub fn marginal(&self, tpn: u32) -> f64 {
        self.z(tpn + 1) - self.z(tpn)
    }
}

impl Clusterable for FspCluster {
    fn merge_cost(&self, other: &Self) -> f64 {
        let mem_span = (self.mem_max.max(other.mem_max) - self.mem_min.min(other.mem_min)) as f64;
        let disk_span =
            (self.disk_max.max(other.disk_max) - self.disk_min.min(other.disk_min)) as f64;
        let z1_gap = (self.z(1) - other.z(1)).abs();
        mem_span + disk_span + z1_gap
    }

    fn merge(&self, other: &Self) -> Self {
        // Upper envelope at each sampled tpn (spec.md §4.3: "componentwise
        // upper envelope at each (a, tpn)").
        let len = self.zvalues.len().max(other.zvalues.len());
        let zvalues = (1..=len as u32)
            .map(|tpn| self.z(tpn).max(other.z(tpn)))
            .collect();
        FspCluster {
            mem_min: self.mem_min.min(other.mem_min),
            mem_max: self.mem_max.max(other.mem_max),
            disk_min: self.disk_min.min(other.disk_min),
            disk_max: self.disk_max.max(other.disk_max),
            zvalues,
            count: self.count + other.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FspSummary {
    pub clusters: Vec<FspCluster>,
    /// The slowness a lone machine taking on one more task than anyone
    /// else in the subtree would exhibit — the worst case spec.md §3
    /// calls "slowest machine" slowness.
    pub slowest_machine_slowness: f64,
}

impl FspSummary {
    pub fn new(clusters: Vec<FspCluster>, slowest_machine_slowness: f64) -> Self {
        FspSummary {
            clusters,
            slowest_machine_slowness,
        }
    }

    pub fn empty() -> Self {
        FspSummary {
            clusters: Vec::new(),
            slowest_machine_slowness: f64::INFINITY,
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut merged = self.clusters.clone();
        merged.extend(other.clusters.iter().cloned());
        FspSummary {
            clusters: merged,
            slowest_machine_slowness: self
                .slowest_machine_slowness
                .max(other.slowest_machine_slowness),
        }
    }

    pub fn reduce(&mut self, k: u32) {
        cluster::reduce(&mut self.clusters, k as usize);
    }

    pub fn equal_within_threshold(&self, other: &Self, threshold: f64) -> bool {
        if self.clusters.len() != other.clusters.len() {
            return false;
        }
        self.clusters.iter().zip(other.clusters.iter()).all(|(a, b)| {
            (a.z(1) - b.z(1)).abs() <= threshold
        })
    }

    pub fn candidates(&self, min_memory_mb: u64, min_disk_mb: u64) -> Vec<&FspCluster> {
        self.clusters
            .iter()
            .filter(|c| c.satisfies(min_memory_mb, min_disk_mb))
            .collect()
    }

    /// Minimum achievable slowness at `tpn=1` across every cluster, or
    /// `slowest_machine_slowness` if the subtree has no capacity at all.
    pub fn min_slowness(&self) -> f64 {
        self.clusters
            .iter()
            .map(|c| c.z(1))
            .fold(f64::INFINITY, f64::min)
    }

    /// Worst (maximum) slowness reachable across every cluster.
    pub fn max_slowness(&self) -> f64 {
        self.clusters.iter().map(|c| c.z(1)).fold(0.0, f64::max)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Sample count across every cluster's `Z` table.
    pub fn sample_count(&self) -> usize {
        self.clusters.iter().map(|c| c.zvalues.len()).sum()
    }
}
