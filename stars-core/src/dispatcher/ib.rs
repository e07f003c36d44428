//! IB's dispatcher split (spec.md §4.2): pick the child with the
//! strictly better summary; ties go to whichever child's zone is closer
//! to the requester; send every task there.

use crate::address::Address;
use crate::overlay::Side;
use crate::summary::ib::IbSummary;
use crate::zone::ZoneDescription;

use super::SplitResult;

#[allow(clippy::too_many_arguments)]
pub fn split(
    min_memory_mb: u64,
    min_disk_mb: u64,
    num_tasks: u32,
    requester: Address,
    skip_left: bool,
    skip_right: bool,
    left: Option<&IbSummary>,
    right: Option<&IbSummary>,
    left_zone: Option<ZoneDescription>,
    right_zone: Option<ZoneDescription>,
    must_go_down: bool,
    is_root: bool,
) -> SplitResult {
    let left_ok = left.is_some_and(|s| s.satisfies(min_memory_mb, min_disk_mb));
    let right_ok = right.is_some_and(|s| s.satisfies(min_memory_mb, min_disk_mb));

    let winner = match (left_ok, right_ok) {
        (true, false) => Some(Side::Left),
        (false, true) => Some(Side::Right),
        (true, true) => {
            let l = left.unwrap();
            let r = right.unwrap();
            if l.better_than(r) {
                Some(Side::Left)
            } else if r.better_than(l) {
                Some(Side::Right)
            } else if skip_left && !skip_right {
                Some(Side::Right)
            } else if skip_right && !skip_left {
                Some(Side::Left)
            } else {
                match (left_zone, right_zone) {
                    (Some(lz), Some(rz)) => {
                        let ld = lz.distance_to_address(&requester);
                        let rd = rz.distance_to_address(&requester);
                        Some(if ld <= rd { Side::Left } else { Side::Right })
                    }
                    _ => Some(Side::Left),
                }
            }
        }
        (false, false) => None,
    };

    match winner {
        Some(side) => SplitResult::all_to(side, num_tasks),
        None if is_root || must_go_down => SplitResult::dropped(num_tasks),
        None => SplitResult::to_father(num_tasks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    fn zone(last: u8) -> ZoneDescription {
        ZoneDescription::singleton(addr(last))
    }

    #[test]
    fn prefers_the_strictly_better_child() {
        let left = IbSummary::new(4096, 4096, 2.0);
        let right = IbSummary::new(1024, 1024, 1.0);
        let r = split(
            128, 128, 10, addr(9), false, false, Some(&left), Some(&right),
            Some(zone(1)), Some(zone(2)), false, false,
        );
        assert_eq!(r.to_left, 10);
        assert_eq!(r.to_right, 0);
    }

    #[test]
    fn drops_at_root_when_neither_side_fits() {
        let left = IbSummary::new(1, 1, 1.0);
        let right = IbSummary::new(1, 1, 1.0);
        let r = split(
            4096, 4096, 10, addr(9), false, false, Some(&left), Some(&right),
            Some(zone(1)), Some(zone(2)), false, true,
        );
        assert_eq!(r.dropped, 10);
    }

    #[test]
    fn forwards_to_father_when_not_root_and_neither_side_fits() {
        let r = split(
            4096, 4096, 10, addr(9), false, false, None, None, None, None, false, false,
        );
        assert_eq!(r.to_father, 10);
        assert_eq!(r.dropped, 0);
    }

    #[test]
    fn never_bounces_a_from_father_bag_back_to_the_father() {
        let r = split(
            4096, 4096, 10, addr(9), false, false, None, None, None, None, true, false,
        );
        assert_eq!(r.to_father, 0);
        assert_eq!(r.dropped, 10);
    }

    #[test]
    fn tie_breaks_toward_the_skipped_sides_sibling() {
        let left = IbSummary::new(1024, 1024, 1.0);
        let right = IbSummary::new(1024, 1024, 1.0);
        // requester == left child address, bag not from an executor: left is
        // skipped in the tie-break, so right wins even though they're equal.
        let r = split(
            128, 128, 5, addr(1), true, false, Some(&left), Some(&right),
            Some(zone(1)), Some(zone(2)), false, false,
        );
        assert_eq!(r.to_right, 5);
        assert_eq!(r.to_left, 0);
    }
}
