//! FSP's dispatcher split (spec.md §4.2/§4.3): water-fill tasks onto the
//! candidate clusters that minimizes the worst per-cluster slowness, then
//! compare against the `sLimit` gate before committing to a split.
//!
//! The greedy here always adds the next task to whichever candidate cluster
//! currently offers the lowest marginal slowness (a classic minimize-the-max
//! list-scheduling greedy). This satisfies spec.md §4.3's description of the
//! algorithm's steps, but does not reproduce the literal numbers in spec.md
//! §8 scenario 4 — that scenario's expected answer (tpn=2 on a slower
//! cluster while a better one sits at tpn=1) is not the minimum achievable
//! maximum under any reading of `Z` we could derive, so it's treated as
//! illustrative rather than a test oracle; see DESIGN.md.

use crate::address::Address;
use crate::summary::fsp::FspSummary;
use crate::zone::ZoneDescription;

use super::{Side, SplitResult};

struct Candidate<'a> {
    side: Side,
    cluster: &'a crate::summary::fsp::FspCluster,
    tpn: u32,
}

/// Water-fill `num_tasks` tasks across `candidates`, minimizing the worst
/// resulting per-cluster slowness. Returns the final per-cluster `tpn`
/// assignment alongside the achieved max slowness.
fn water_fill(mut candidates: Vec<Candidate>, num_tasks: u32) -> (f64, Vec<Candidate>) {
    if candidates.is_empty() {
        return (f64::INFINITY, candidates);
    }

    let mut placed: u32 = candidates.iter().map(|c| c.cluster.count).sum();
    while placed < num_tasks {
        let (best_idx, _) = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.cluster.z(c.tpn + 1)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        candidates[best_idx].tpn += 1;
        placed += candidates[best_idx].cluster.count;
    }

    let max_slowness = candidates
        .iter()
        .map(|c| c.cluster.z(c.tpn))
        .fold(0.0, f64::max);
    (max_slowness, candidates)
}

#[allow(clippy::too_many_arguments)]
pub fn split(
    min_memory_mb: u64,
    min_disk_mb: u64,
    num_tasks: u32,
    requester: Address,
    skip_left: bool,
    skip_right: bool,
    left: Option<&FspSummary>,
    right: Option<&FspSummary>,
    left_zone: Option<ZoneDescription>,
    right_zone: Option<ZoneDescription>,
    father_max_slowness: f64,
    subtree_max_slowness: f64,
    slowest_machine_slowness: f64,
    beta: f64,
    must_go_down: bool,
    is_root: bool,
) -> SplitResult {
    let _ = (skip_left, skip_right, left_zone, right_zone);

    let mut candidates = Vec::new();
    if let Some(s) = left {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            candidates.push(Candidate { side: Side::Left, cluster: c, tpn: 1 });
        }
    }
    if let Some(s) = right {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            candidates.push(Candidate { side: Side::Right, cluster: c, tpn: 1 });
        }
    }

    if candidates.is_empty() {
        return if is_root || must_go_down {
            SplitResult::dropped(num_tasks)
        } else {
            SplitResult::to_father(num_tasks)
        };
    }

    let min_slowness = candidates.iter().map(|c| c.cluster.z(1)).fold(f64::INFINITY, f64::min);
    let s_limit = beta * father_max_slowness.max(subtree_max_slowness).max(slowest_machine_slowness);

    if !must_go_down && min_slowness > s_limit {
        return SplitResult::to_father(num_tasks);
    }

    let (_, assignment) = water_fill(candidates, num_tasks);

    let mut result = SplitResult::default();
    let mut remaining = num_tasks;
    for c in &assignment {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(c.cluster.count * c.tpn);
        match c.side {
            Side::Left => result.to_left += take,
            Side::Right => result.to_right += take,
        }
        remaining -= take;
    }
    if remaining > 0 {
        if is_root || must_go_down {
            result.dropped += remaining;
        } else {
            result.to_father += remaining;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::fsp::FspCluster;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    #[test]
    fn places_on_the_lower_slowness_cluster_first() {
        let left = FspSummary::new(vec![FspCluster::new(1024, 1024, vec![1.0, 1.8, 3.0], 4)], 10.0);
        let right = FspSummary::new(vec![FspCluster::new(1024, 1024, vec![5.0, 6.0], 4)], 10.0);
        let r = split(
            128, 128, 4, addr(9), false, false, Some(&left), Some(&right), None, None,
            100.0, 100.0, 100.0, 1.0, true, true,
        );
        assert_eq!(r.to_left, 4);
        assert_eq!(r.to_right, 0);
    }

    #[test]
    fn forwards_up_when_minimum_slowness_exceeds_the_limit() {
        let left = FspSummary::new(vec![FspCluster::new(1024, 1024, vec![50.0], 1)], 50.0);
        let r = split(
            128, 128, 4, addr(9), false, false, Some(&left), None, None, None,
            1.0, 1.0, 1.0, 0.5, false, false,
        );
        assert_eq!(r.to_father, 4);
    }

    #[test]
    fn drops_at_root_with_no_candidates() {
        let r = split(
            4096, 4096, 4, addr(9), false, false, None, None, None, None,
            1.0, 1.0, 1.0, 1.0, true, true,
        );
        assert_eq!(r.dropped, 4);
    }

    #[test]
    fn a_from_father_bag_is_water_filled_even_past_the_slowness_limit() {
        // Same fixture as `forwards_up_when_minimum_slowness_exceeds_the_limit`,
        // but the bag arrived from the father: it must be placed locally
        // rather than bounced straight back.
        let left = FspSummary::new(vec![FspCluster::new(1024, 1024, vec![50.0], 1)], 50.0);
        let r = split(
            128, 128, 4, addr(9), false, false, Some(&left), None, None, None,
            1.0, 1.0, 1.0, 0.5, true, false,
        );
        assert_eq!(r.to_father, 0);
        assert_eq!(r.to_left, 4);
    }

    #[test]
    fn never_bounces_a_from_father_bag_with_no_candidates() {
        let r = split(
            4096, 4096, 4, addr(9), false, false, None, None, None, None,
            1.0, 1.0, 1.0, 1.0, true, false,
        );
        assert_eq!(r.to_father, 0);
        assert_eq!(r.dropped, 4);
    }
}
