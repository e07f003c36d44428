//! DP's dispatcher split (spec.md §4.2): sort candidate clusters by
//! memory/disk waste and available compute slack before the deadline,
//! greedily assign slots, and break forwarding loops with the shared
//! [`LoopBreaker`](super::lru::LoopBreaker) cache.

use crate::address::Address;
use crate::summary::dp::DpSummary;
use crate::time::Time;
use crate::zone::ZoneDescription;

use super::{Side, SplitResult};

const ALPHA: f64 = 1.0;
const BETA: f64 = 1.0;
const GAMMA: f64 = 0.01;

struct Candidate {
    side: Side,
    mem_waste: u64,
    disk_waste: u64,
    slots: u32,
    slack: f64,
    distance: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn split(
    min_memory_mb: u64,
    min_disk_mb: u64,
    num_tasks: u32,
    task_length: u64,
    deadline: Time,
    requester: Address,
    skip_left: bool,
    skip_right: bool,
    left: Option<&DpSummary>,
    right: Option<&DpSummary>,
    left_zone: Option<ZoneDescription>,
    right_zone: Option<ZoneDescription>,
    must_go_down: bool,
    is_root: bool,
) -> SplitResult {
    let unit_cost = task_length.max(1);
    let mut candidates = Vec::new();
    if let Some(s) = left {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            let avail = c.availability_before(deadline);
            candidates.push(Candidate {
                side: Side::Left,
                mem_waste: c.mem_waste(min_memory_mb),
                disk_waste: c.disk_waste(min_disk_mb),
                slots: (avail / unit_cost) as u32,
                slack: avail as f64,
                distance: left_zone.map(|z| z.distance_to_address(&requester)).unwrap_or(0.0)
                    + if skip_left { f64::MAX / 2.0 } else { 0.0 },
            });
        }
    }
    if let Some(s) = right {
        for c in s.candidates(min_memory_mb, min_disk_mb) {
            let avail = c.availability_before(deadline);
            candidates.push(Candidate {
                side: Side::Right,
                mem_waste: c.mem_waste(min_memory_mb),
                disk_waste: c.disk_waste(min_disk_mb),
                slots: (avail / unit_cost) as u32,
                slack: avail as f64,
                distance: right_zone.map(|z| z.distance_to_address(&requester)).unwrap_or(0.0)
                    + if skip_right { f64::MAX / 2.0 } else { 0.0 },
            });
        }
    }

    let cost = |c: &Candidate| ALPHA * c.mem_waste as f64 + BETA * c.disk_waste as f64 - GAMMA * c.slack;
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
        let take = remaining.min(c.slots);
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
