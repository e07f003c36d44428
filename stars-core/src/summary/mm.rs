//! MM (min-makespan) availability summary: a clustered set of
//! `(memory, disk, power, queue-end-time)` bounding boxes, each carrying a
//! count — spec.md §3.

use serde::{Deserialize, Serialize};

use super::cluster::{self, Clusterable};

/// One bounding-box cluster: every leaf it represents has at least
/// `*_min` and at most `*_max` of each scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MmCluster {
    pub mem_min: u64,
    pub mem_max: u64,
    pub disk_min: u64,
    pub disk_max: u64,
    pub power_min: f64,
    pub power_max: f64,
    pub queue_end_min: u64,
    pub queue_end_max: u64,
    /// Number of leaves this box represents.
    pub count: u32,
}

impl MmCluster {
    /// A cluster describing a single leaf exactly (no range yet to widen).
    pub fn singleton(mem: u64, disk: u64, power: f64, queue_end: u64) -> Self {
        MmCluster {
            mem_min: mem,
            mem_max: mem,
            disk_min: disk,
            disk_max: disk,
            power_min: power,
            power_max: power,
            queue_end_min: queue_end,
            queue_end_max: queue_end,
            count: 1,
        }
    }

    /// Whether every leaf in this cluster can host the requested task.
    pub fn satisfies(&self, min_memory_mb: u64, min_disk_mb: u64) -> bool {
        self.mem_min >= min_memory_mb && self.disk_min >= min_disk_mb
    }

    /// How much the box over-provisions relative to the request — used by
    /// the dispatcher's greedy fill ordering (spec.md §4.2).
    pub fn waste(&self, min_memory_mb: u64, min_disk_mb: u64) -> u64 {
        self.mem_min.saturating_sub(min_memory_mb) + self.disk_min.saturating_sub(min_disk_mb)
    }
}

impl Clusterable for MmCluster {
    fn merge_cost(&self, other: &Self) -> f64 {
        let mem_span = (self.mem_max.max(other.mem_max) - self.mem_min.min(other.mem_min)) as f64;
        let disk_span =
            (self.disk_max.max(other.disk_max) - self.disk_min.min(other.disk_min)) as f64;
        let qe_span = (self.queue_end_max.max(other.queue_end_max)
            - self.queue_end_min.min(other.queue_end_min)) as f64;
        mem_span + disk_span + qe_span
    }

    fn merge(&self, other: &Self) -> Self {
        MmCluster {
            mem_min: self.mem_min.min(other.mem_min),
            mem_max: self.mem_max.max(other.mem_max),
            disk_min: self.disk_min.min(other.disk_min),
            disk_max: self.disk_max.max(other.disk_max),
            power_min: self.power_min.min(other.power_min),
            power_max: self.power_max.max(other.power_max),
            queue_end_min: self.queue_end_min.min(other.queue_end_min),
            queue_end_max: self.queue_end_max.max(other.queue_end_max),
            count: self.count + other.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmSummary {
    pub clusters: Vec<MmCluster>,
}

impl MmSummary {
    pub fn new(clusters: Vec<MmCluster>) -> Self {
        MmSummary { clusters }
    }

    pub fn empty() -> Self {
        MmSummary { clusters: Vec::new() }
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut merged = self.clusters.clone();
        merged.extend(other.clusters.iter().cloned());
        // preserve whatever budget the larger input observed; callers call
        // reduce() explicitly with the configured K before publishing.
        MmSummary { clusters: merged }
    }

    pub fn reduce(&mut self, k: u32) {
        cluster::reduce(&mut self.clusters, k as usize);
    }

    pub fn equal_within_threshold(&self, other: &Self, threshold: f64) -> bool {
        if self.clusters.len() != other.clusters.len() {
            return false;
        }
        self.clusters.iter().zip(other.clusters.iter()).all(|(a, b)| {
            (a.mem_min as f64 - b.mem_min as f64).abs() <= threshold
                && (a.disk_min as f64 - b.disk_min as f64).abs() <= threshold
                && (a.queue_end_max as f64 - b.queue_end_max as f64).abs() <= threshold
        })
    }

    /// Clusters able to host at least one task meeting the request.
    pub fn candidates(&self, min_memory_mb: u64, min_disk_mb: u64) -> Vec<&MmCluster> {
        self.clusters
            .iter()
            .filter(|c| c.satisfies(min_memory_mb, min_disk_mb))
            .collect()
    }

    /// Subtree-wide minimum queue-end time across all clusters, `0` if empty.
    pub fn min_queue_end(&self) -> u64 {
        self.clusters.iter().map(|c| c.queue_end_min).min().unwrap_or(0)
    }

    /// Subtree-wide maximum queue-end time across all clusters, `0` if empty
    /// — this is the `father.maxQueueLength` scalar spec.md §4.2 refers to.
    pub fn max_queue_end(&self) -> u64 {
        self.clusters.iter().map(|c| c.queue_end_max).max().unwrap_or(0)
    }

    pub fn total_count(&self) -> u32 {
        self.clusters.iter().map(|c| c.count).sum()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_concatenates_without_losing_clusters() {
        let a = MmSummary::new(vec![MmCluster::singleton(1024, 1024, 1.0, 100)]);
        let b = MmSummary::new(vec![MmCluster::singleton(2048, 2048, 2.0, 50)]);
        let j = a.join(&b);
        assert_eq!(j.clusters.len(), 2);
    }

    #[test]
    fn reduce_respects_budget() {
        let mut s = MmSummary::new(vec![
            MmCluster::singleton(1024, 1024, 1.0, 100),
            MmCluster::singleton(1025, 1025, 1.0, 101),
            MmCluster::singleton(2048, 2048, 2.0, 50),
        ]);
        s.reduce(2);
        assert_eq!(s.clusters.len(), 2);
    }

    #[test]
    fn candidates_filters_by_requirement() {
        let s = MmSummary::new(vec![
            MmCluster::singleton(128, 64, 1.0, 0),
            MmCluster::singleton(1024, 1024, 1.0, 0),
        ]);
        let c = s.candidates(512, 512);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].mem_min, 1024);
    }

    #[test]
    fn max_queue_end_tracks_worst_cluster() {
        let s = MmSummary::new(vec![
            MmCluster::singleton(1024, 1024, 1.0, 10),
            MmCluster::singleton(1024, 1024, 1.0, 90),
        ]);
        assert_eq!(s.max_queue_end(), 90);
        assert_eq!(s.min_queue_end(), 10);
    }
}
