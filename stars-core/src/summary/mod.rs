//! Availability summaries: the bounded-size abstract descriptions of
//! subtree capacity the dispatcher routes on (spec.md §2/§3).
//!
//! Implemented as tagged variants over a common capability set, per the
//! "polymorphism over policy" design note (spec.md §9): one Rust enum,
//! `AvailabilitySummary`, carrying exactly one of the four policy-specific
//! summary types. The dispatcher's split logic matches on the tag.

pub mod cluster;
pub mod dp;
pub mod fsp;
pub mod ib;
pub mod mm;

use serde::{Deserialize, Serialize};

use crate::config::Policy;

pub use dp::DpSummary;
pub use fsp::FspSummary;
pub use ib::IbSummary;
pub use mm::MmSummary;

/// One subtree's availability, tagged by the policy the whole overlay
/// tree agreed on at startup (spec.md §6's `policy` config key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AvailabilitySummary {
    Ib(IbSummary),
    Mm(MmSummary),
    Dp(DpSummary),
    Fsp(FspSummary),
}

impl AvailabilitySummary {
    /// Opaque wire encoding carried in [`crate::envelope::AvailabilityUpdateMsg`].
    /// `serde_json` rather than `prost` — the cluster tables don't warrant a
    /// hand-written `.proto` schema, and every peer in a tree runs the same
    /// binary so there's no cross-version compatibility to design for.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("AvailabilitySummary always serializes")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn policy(&self) -> Policy {
        match self {
            AvailabilitySummary::Ib(_) => Policy::Ib,
            AvailabilitySummary::Mm(_) => Policy::Mm,
            AvailabilitySummary::Dp(_) => Policy::Dp,
            AvailabilitySummary::Fsp(_) => Policy::Fsp,
        }
    }

    /// Commutative, associative merge of two subtree summaries under the
    /// same policy. Panics on a policy mismatch — every peer in a tree
    /// agreed on one policy at startup, so a mismatch is a configuration
    /// bug, not a runtime condition to recover from.
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (AvailabilitySummary::Ib(a), AvailabilitySummary::Ib(b)) => {
                AvailabilitySummary::Ib(a.join(b))
            }
            (AvailabilitySummary::Mm(a), AvailabilitySummary::Mm(b)) => {
                AvailabilitySummary::Mm(a.join(b))
            }
            (AvailabilitySummary::Dp(a), AvailabilitySummary::Dp(b)) => {
                AvailabilitySummary::Dp(a.join(b))
            }
            (AvailabilitySummary::Fsp(a), AvailabilitySummary::Fsp(b)) => {
                AvailabilitySummary::Fsp(a.join(b))
            }
            _ => panic!("joined summaries under different policies"),
        }
    }

    /// Force this summary down to `k` clusters before transmission.
    pub fn reduce(&mut self, k: u32) {
        match self {
            AvailabilitySummary::Ib(s) => s.reduce(k),
            AvailabilitySummary::Mm(s) => s.reduce(k),
            AvailabilitySummary::Dp(s) => s.reduce(k),
            AvailabilitySummary::Fsp(s) => s.reduce(k),
        }
    }

    /// Estimated serialized size in bytes, for [`crate::propagation`]'s
    /// token bucket (spec.md §4.5). A fixed header plus a fixed cost per
    /// cluster and, for DP/FSP, per sampled table entry — close enough to
    /// the real `prost` encoding to gate bandwidth sensibly without
    /// round-tripping through the wire codec on every publish attempt.
    pub fn wire_size_bytes(&self) -> u64 {
        const HEADER_BYTES: u64 = 24;
        const BYTES_PER_CLUSTER: u64 = 40;
        const BYTES_PER_SAMPLE: u64 = 8;

        let body = match self {
            AvailabilitySummary::Ib(s) => s.cluster_count() as u64 * BYTES_PER_CLUSTER,
            AvailabilitySummary::Mm(s) => s.cluster_count() as u64 * BYTES_PER_CLUSTER,
            AvailabilitySummary::Dp(s) => {
                s.cluster_count() as u64 * BYTES_PER_CLUSTER + s.sample_count() as u64 * BYTES_PER_SAMPLE
            }
            AvailabilitySummary::Fsp(s) => {
                s.cluster_count() as u64 * BYTES_PER_CLUSTER + s.sample_count() as u64 * BYTES_PER_SAMPLE
            }
        };
        HEADER_BYTES + body
    }

    /// Change-detection predicate used by upward propagation (spec.md
    /// §4.5) to suppress publishes that would not meaningfully change what
    /// the parent sees.
    pub fn equal_within_threshold(&self, other: &Self, threshold: f64) -> bool {
        match (self, other) {
            (AvailabilitySummary::Ib(a), AvailabilitySummary::Ib(b)) => {
                a.equal_within_threshold(b, threshold)
            }
            (AvailabilitySummary::Mm(a), AvailabilitySummary::Mm(b)) => {
                a.equal_within_threshold(b, threshold)
            }
            (AvailabilitySummary::Dp(a), AvailabilitySummary::Dp(b)) => {
                a.equal_within_threshold(b, threshold)
            }
            (AvailabilitySummary::Fsp(a), AvailabilitySummary::Fsp(b)) => {
                a.equal_within_threshold(b, threshold)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_preserves_policy_tag() {
        let a = AvailabilitySummary::Ib(IbSummary::new(1024, 1024, 1.0));
        let b = AvailabilitySummary::Ib(IbSummary::new(512, 2048, 2.0));
        let j = a.join(&b);
        assert_eq!(j.policy(), Policy::Ib);
    }

    #[test]
    #[should_panic(expected = "different policies")]
    fn join_rejects_policy_mismatch() {
        let a = AvailabilitySummary::Ib(IbSummary::new(1024, 1024, 1.0));
        let b = AvailabilitySummary::Mm(MmSummary::empty());
        let _ = a.join(&b);
    }

    #[test]
    fn to_bytes_round_trips_through_from_bytes() {
        let s = AvailabilitySummary::Ib(IbSummary::new(1024, 2048, 1.5));
        let bytes = s.to_bytes();
        assert_eq!(AvailabilitySummary::from_bytes(&bytes).unwrap(), s);
    }

    #[test]
    fn wire_size_grows_with_cluster_count() {
        let empty = AvailabilitySummary::Mm(MmSummary::empty());
        let one = AvailabilitySummary::Mm(MmSummary::new(vec![mm::MmCluster::singleton(1024, 1024, 1.0, 0)]));
        assert!(one.wire_size_bytes() > empty.wire_size_bytes());
    }
}
