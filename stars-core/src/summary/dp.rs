//! DP (deadline-priority) availability summary: a clustered set of
//! `(memory, disk, computing-time-available-before-deadline)` bounding
//! boxes, each carrying a count — spec.md §3.
//!
//! Availability-before-deadline is represented as a step function sampled
//! at reference deadlines, following "derived from a per-node step
//! function sampled at reference deadlines" (spec.md §3).

use serde::{Deserialize, Serialize};

use super::cluster::{self, Clusterable};
use crate::time::Time;

/// One bounding-box cluster plus its step function of compute units
/// available before a deadline. Samples are kept sorted by deadline,
/// non-decreasing in `compute_units` (later deadlines can only offer at
/// least as much room as earlier ones).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpCluster {
    pub mem_min: u64,
    pub mem_max: u64,
    pub disk_min: u64,
    pub disk_max: u64,
    /// `(deadline, compute units available strictly before that deadline)`.
    samples: Vec<(Time, u64)>,
    pub count: u32,
}

impl DpCluster {
    pub fn new(mem: u64, disk: u64, samples: Vec<(Time, u64)>, count: u32) -> Self {
        let mut samples = samples;
        samples.sort_by_key(|(t, _)| *t);
        DpCluster {
            mem_min: mem,
            mem_max: mem,
            disk_min: disk,
            disk_max: disk,
            samples,
            count,
        }
    }

    pub fn satisfies(&self, min_memory_mb: u64, min_disk_mb: u64) -> bool {
        self.mem_min >= min_memory_mb && self.disk_min >= min_disk_mb
    }

    /// Compute units available strictly before `deadline`, using the
    /// latest sample at or before it (`0` if `deadline` precedes every
    /// sample).
    pub fn availability_before(&self, deadline: Time) -> u64 {
        self.samples
            .iter()
            .rev()
            .find(|(t, _)| *t <= deadline)
            .map(|(_, units)| *units)
            .unwrap_or(0)
    }

    pub fn mem_waste(&self, min_memory_mb: u64) -> u64 {
        self.mem_min.saturating_sub(min_memory_mb)
    }

    pub fn disk_waste(&self, min_disk_mb: u64) -> u64 {
        self.disk_min.saturating_sub(min_disk_mb)
    }
}

impl Clusterable for DpCluster {
    fn merge_cost(&self, other: &Self) -> f64 {
        let mem_span = (self.mem_max.max(other.mem_max) - self.mem_min.min(other.mem_min)) as f64;
        let disk_span =
            (self.disk_max.max(other.disk_max) - self.disk_min.min(other.disk_min)) as f64;
        mem_span + disk_span
    }

    fn merge(&self, other: &Self) -> Self {
        let mut samples = self.samples.clone();
        samples.extend(other.samples.iter().cloned());
        samples.sort_by_key(|(t, _)| *t);
        // keep the envelope's minimum at each deadline (bounded merge: we
        // may not promise more than the tighter operand claims).
        let mut merged_samples: Vec<(Time, u64)> = Vec::new();
        for (t, units) in samples {
            match merged_samples.last_mut() {
                Some((last_t, last_units)) if *last_t == t => {
                    *last_units = (*last_units).min(units);
                }
                _ => merged_samples.push((t, units)),
            }
        }
        DpCluster {
            mem_min: self.mem_min.min(other.mem_min),
            mem_max: self.mem_max.max(other.mem_max),
            disk_min: self.disk_min.min(other.disk_min),
            disk_max: self.disk_max.max(other.disk_max),
            samples: merged_samples,
            count: self.count + other.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpSummary {
    pub clusters: Vec<DpCluster>,
}

impl DpSummary {
    pub fn new(clusters: Vec<DpCluster>) -> Self {
        DpSummary { clusters }
    }

    pub fn empty() -> Self {
        DpSummary { clusters: Vec::new() }
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut merged = self.clusters.clone();
        merged.extend(other.clusters.iter().cloned());
        DpSummary { clusters: merged }
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
        })
    }

    pub fn candidates(&self, min_memory_mb: u64, min_disk_mb: u64) -> Vec<&DpCluster> {
        self.clusters
            .iter()
            .filter(|c| c.satisfies(min_memory_mb, min_disk_mb))
            .collect()
    }

    /// Total compute units this subtree claims to offer before `deadline`,
    /// summed across candidate clusters.
    pub fn availability_before(&self, deadline: Time) -> u64 {
        self.clusters.iter().map(|c| c.availability_before(deadline)).sum()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Sample count across every cluster — DP's wire cost grows with the
    /// step-function tables, not just the cluster count.
    pub fn sample_count(&self) -> usize {
        self.clusters.iter().map(|c| c.samples.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_before_uses_latest_sample_at_or_before() {
        let c = DpCluster::new(
            1024,
            1024,
            vec![
                (Time::from_micros(100), 10),
                (Time::from_micros(200), 30),
            ],
            1,
        );
        assert_eq!(c.availability_before(Time::from_micros(50)), 0);
        assert_eq!(c.availability_before(Time::from_micros(100)), 10);
        assert_eq!(c.availability_before(Time::from_micros(150)), 10);
        assert_eq!(c.availability_before(Time::from_micros(250)), 30);
    }

    #[test]
    fn merge_takes_tighter_bound_at_shared_deadlines() {
        let a = DpCluster::new(1024, 1024, vec![(Time::from_micros(100), 50)], 1);
        let b = DpCluster::new(2048, 2048, vec![(Time::from_micros(100), 20)], 1);
        let m = a.merge(&b);
        assert_eq!(m.availability_before(Time::from_micros(100)), 20);
        assert_eq!(m.count, 2);
    }

    #[test]
    fn reduce_respects_budget() {
        let mut s = DpSummary::new(vec![
            DpCluster::new(1024, 1024, vec![(Time::from_micros(100), 10)], 1),
            DpCluster::new(1025, 1025, vec![(Time::from_micros(100), 11)], 1),
            DpCluster::new(4096, 4096, vec![(Time::from_micros(100), 99)], 1),
        ]);
        s.reduce(2);
        assert_eq!(s.clusters.len(), 2);
    }
}
