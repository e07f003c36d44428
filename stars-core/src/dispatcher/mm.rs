//! MM's dispatcher split (spec.md §4.2): greedily fill the least-wasteful,
//! least-overflowing candidate clusters from both children until every task
//! in the bag is placed, forwarding any that don't fit to the father —
//! unless the bag must go down (spec.md §8's No-bounce invariant), in
//! which case the unplaced remainder is dropped instead.

use crate::address::Address;
use crate::summary::mm::MmSummary;
use crate::time::Time;
use crate::zone::ZoneDescription;

use super::{Side, SplitResult};

/// Weight on the queue-overflow term of the greedy sort key. The exact
/// value isn't specified; this keeps overflow and waste on comparable
/// scales for the task sizes this crate's test fixtures use.
const ALPHA: f64 = 1.0;

struct Candidate {
    side: Side,
    waste: u64,
    queue_end_max: u64,
    count: u32,
    distance: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn split(
    min_memory_mb: u64,
    min_disk_mb: u64,
    num_tasks: u32,
    requester: Address,
    skip_left: bool,
    skip_right: bool,
    left: Option<&MmSummary>,
    right: Option<&MmSummary>,
    left_zone: Option<ZoneDescription>,
    right_zone: Option<ZoneDescription>,
    now: Time,
    father_max_queue_end: Option<u64>,
    beta: f64,
    one_task_time_us: u64,
    must_go_down: bool,
    is_root: bool,
) -> SplitResult {
    let mut candidates = Vec::new();
    if let Some(s) = left {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            candidates.push(Candidate {
                side: Side::Left,
                waste: c.waste(min_memory_mb, min_disk_mb),
                queue_end_max: c.queue_end_max,
                count: c.count,
                distance: left_zone.map(|z| z.distance_to_address(&requester)).unwrap_or(0.0)
                    + if skip_left { f64::MAX / 2.0 } else { 0.0 },
            });
        }
    }
    if let Some(s) = right {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            candidates.push(Candidate {
                side: Side::Right,
                waste: c.waste(min_memory_mb, min_disk_mb),
                queue_end_max: c.queue_end_max,
                count: c.count,
                distance: right_zone.map(|z| z.distance_to_address(&requester)).unwrap_or(0.0)
                    + if skip_right { f64::MAX / 2.0 } else { 0.0 },
            });
        }
    }

    let subtree_max = candidates.iter().map(|c| c.queue_end_max).max().unwrap_or(now.as_micros());
    let target_base = father_max_queue_end.unwrap_or(subtree_max).max(now.as_micros());
    let t = target_base as f64 * beta;

    let cost = |c: &Candidate| -> f64 {
        let denom = (t - c.queue_end_max as f64 + one_task_time_us as f64).max(1.0);
        c.waste as f64 + ALPHA / denom
    };

    candidates.sort_by(|a, b| {
        cost(a)
            .partial_cmp(&cost(b))
            .unwrap()
            .then(a.distance.partial_cmp(&b.distance).unwrap())
    });

    let mut remaining = num_tasks;
    let mut result = SplitResult::default();
    for c in &candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(c.count);
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
    use crate::summary::mm::MmCluster;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    fn zone(last: u8) -> ZoneDescription {
        ZoneDescription::singleton(addr(last))
    }

    #[test]
    fn fills_the_least_wasteful_cluster_first() {
        let left = MmSummary::new(vec![MmCluster::singleton(4096, 4096, 1.0, 0)]);
        let right = MmSummary::new(vec![MmCluster::singleton(128, 128, 1.0, 0)]);
        let r = split(
            128, 128, 1, addr(9), false, false, Some(&left), Some(&right),
            Some(zone(1)), Some(zone(2)), Time::from_micros(0), None, 0.9, 1_000, false, false,
        );
        assert_eq!(r.to_right, 1);
        assert_eq!(r.to_left, 0);
    }

    #[test]
    fn spills_to_father_when_capacity_runs_out() {
        let left = MmSummary::new(vec![MmCluster::singleton(128, 128, 1.0, 0)]);
        let r = split(
            128, 128, 5, addr(9), false, false, Some(&left), None,
            Some(zone(1)), None, Time::from_micros(0), None, 0.9, 1_000, false, false,
        );
        assert_eq!(r.to_left, 1);
        assert_eq!(r.to_father, 4);
    }

    #[test]
    fn drops_residual_at_root() {
        let left = MmSummary::new(vec![MmCluster::singleton(128, 128, 1.0, 0)]);
        let r = split(
            128, 128, 5, addr(9), false, false, Some(&left), None,
            Some(zone(1)), None, Time::from_micros(0), None, 0.9, 1_000, false, true,
        );
        assert_eq!(r.to_left, 1);
        assert_eq!(r.dropped, 4);
    }

    #[test]
    fn never_bounces_a_from_father_bag_back_to_the_father() {
        let left = MmSummary::new(vec![MmCluster::singleton(128, 128, 1.0, 0)]);
        let r = split(
            128, 128, 5, addr(9), false, false, Some(&left), None,
            Some(zone(1)), None, Time::from_micros(0), None, 0.9, 1_000, true, false,
        );
        assert_eq!(r.to_left, 1);
        assert_eq!(r.to_father, 0);
        assert_eq!(r.dropped, 4);
    }
}
