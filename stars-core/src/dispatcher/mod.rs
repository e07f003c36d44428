//! Dispatcher: the per-internal-node routing component (spec.md §4.2).
//!
//! Holds per-child and per-father summary state and implements the shared
//! `handle` skeleton; the policy-specific split logic lives in its own
//! module (`ib`, `mm`, `dp`, `fsp`) and is dispatched on by tag, following
//! the "polymorphism over policy" design note also used by
//! [`crate::summary::AvailabilitySummary`].

pub mod dp;
pub mod fsp;
pub mod ib;
pub mod lru;
pub mod mm;

use tracing::{debug, warn};

use crate::address::Address;
use crate::config::Policy;
use crate::envelope::TaskBagMsg;
use crate::overlay::OverlayAdapter;
use crate::summary::{AvailabilitySummary, dp::DpSummary, fsp::FspSummary, ib::IbSummary, mm::MmSummary};
use crate::time::Time;
use lru::LoopBreaker;

pub use crate::overlay::Side;

/// Where a split sub-bag is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Left,
    Right,
    Father,
}

/// The task-count partition a policy-specific split produces. Every field
/// is a count of tasks, not an index range — `handle` converts counts into
/// contiguous `firstTask..lastTask` ranges once a split function returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitResult {
    pub to_left: u32,
    pub to_right: u32,
    pub to_father: u32,
    pub dropped: u32,
}

impl SplitResult {
    fn all_to(side: Side, n: u32) -> Self {
        match side {
            Side::Left => SplitResult { to_left: n, ..Default::default() },
            Side::Right => SplitResult { to_right: n, ..Default::default() },
        }
    }

    fn to_father(n: u32) -> Self {
        SplitResult { to_father: n, ..Default::default() }
    }

    fn dropped(n: u32) -> Self {
        SplitResult { dropped: n, ..Default::default() }
    }
}

/// A fully-formed sub-bag ready to hand to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingBag {
    pub to: Destination,
    pub bag: TaskBagMsg,
}

#[derive(Default)]
struct ChildLink {
    last_received: Option<AvailabilitySummary>,
    last_sent_down: Option<AvailabilitySummary>,
    has_new_information: bool,
}

#[derive(Default)]
struct FatherLink {
    last_received: Option<AvailabilitySummary>,
    last_published: Option<AvailabilitySummary>,
    pending_publish: bool,
}

/// Per-internal-node dispatcher state (spec.md §4.2's "State" list).
pub struct Dispatcher {
    policy: Policy,
    mmp_beta: f64,
    equality_threshold: f64,
    one_task_time_us: u64,
    left: ChildLink,
    right: ChildLink,
    father: FatherLink,
    loop_breaker: LoopBreaker,
}

impl Dispatcher {
    pub fn new(policy: Policy, mmp_beta: f64, equality_threshold: f64, one_task_time_us: u64) -> Self {
        Dispatcher {
            policy,
            mmp_beta,
            equality_threshold,
            one_task_time_us,
            left: ChildLink::default(),
            right: ChildLink::default(),
            father: FatherLink::default(),
            loop_breaker: LoopBreaker::new(),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// The joined view of both children, as seen from the father's side —
    /// `None` until at least one child has published.
    pub fn joined_summary(&self) -> Option<AvailabilitySummary> {
        match (&self.left.last_received, &self.right.last_received) {
            (Some(l), Some(r)) => Some(l.join(r)),
            (Some(l), None) => Some(l.clone()),
            (None, Some(r)) => Some(r.clone()),
            (None, None) => None,
        }
    }

    /// `onChildSummary` (spec.md §4.2): record a child's new summary and
    /// flag the father-side publish as pending if it changed meaningfully.
    pub fn on_child_summary(&mut self, which: Side, new_summary: AvailabilitySummary) {
        let link = match which {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        let changed = link
            .last_received
            .as_ref()
            .map(|old| !old.equal_within_threshold(&new_summary, self.equality_threshold))
            .unwrap_or(true);
        link.has_new_information = changed;
        link.last_received = Some(new_summary);
        if changed {
            self.father.pending_publish = true;
        }
        debug!(?which, changed, "child summary updated");
    }

    /// `onFatherSummary` (spec.md §4.2): record the father's view and
    /// return the derived summaries (`join(father, other-child)`) that
    /// changed enough to forward down to each child.
    pub fn on_father_summary(&mut self, new_summary: AvailabilitySummary) -> Vec<(Side, AvailabilitySummary)> {
        self.father.last_received = Some(new_summary.clone());
        let mut out = Vec::new();

        let derived_for_left = match &self.right.last_received {
            Some(r) => new_summary.join(r),
            None => new_summary.clone(),
        };
        self.maybe_send_down(Side::Left, derived_for_left, &mut out);

        let derived_for_right = match &self.left.last_received {
            Some(l) => new_summary.join(l),
            None => new_summary.clone(),
        };
        self.maybe_send_down(Side::Right, derived_for_right, &mut out);

        out
    }

    fn maybe_send_down(&mut self, side: Side, derived: AvailabilitySummary, out: &mut Vec<(Side, AvailabilitySummary)>) {
        let link = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        let changed = link
            .last_sent_down
            .as_ref()
            .map(|old| !old.equal_within_threshold(&derived, self.equality_threshold))
            .unwrap_or(true);
        if changed {
            link.last_sent_down = Some(derived.clone());
            out.push((side, derived));
        }
    }

    /// Take the pending upward publish, reduced to the configured cluster
    /// budget, clearing the pending flag. `None` if nothing changed since
    /// the last publish, or there's no summary yet.
    pub fn take_pending_publish(&mut self, k: u32) -> Option<AvailabilitySummary> {
        if !self.father.pending_publish {
            return None;
        }
        let mut joined = self.joined_summary()?;
        joined.reduce(k);
        self.father.pending_publish = false;
        self.father.last_published = Some(joined.clone());
        Some(joined)
    }

    /// `handle` (spec.md §4.2): the single entry point for a `TaskBag`
    /// arriving from `src`. Never fails the caller — an unroutable bag is
    /// dropped and logged, matching spec.md §4.2's "Failure" clause.
    pub fn handle(&mut self, overlay: &dyn OverlayAdapter, src: Address, bag: TaskBagMsg, now: Time) -> Vec<OutgoingBag> {
        if bag.for_en {
            return Vec::new();
        }

        let father_addr = overlay.father();
        let is_root = father_addr.is_none();
        let must_go_down = is_root || (Some(src) == father_addr && !bag.from_en);

        if self.policy == Policy::Dp
            && !is_root
            && self.loop_breaker.seen_recently(bag.requester, bag.request_id, now)
        {
            debug!(request_id = bag.request_id, "duplicate DP request, forwarding up without re-handling");
            return vec![OutgoingBag { to: Destination::Father, bag: forward_unchanged(&bag) }];
        }

        let num_tasks = bag.last_task - bag.first_task + 1;
        let skip_left = Some(bag.requester) == overlay.left_child() && !bag.from_en;
        let skip_right = Some(bag.requester) == overlay.right_child() && !bag.from_en;
        let left_zone = overlay.child_zone(Side::Left);
        let right_zone = overlay.child_zone(Side::Right);

        let result = match self.policy {
            Policy::Ib => {
                let left = self.left.last_received.as_ref().map(as_ib);
                let right = self.right.last_received.as_ref().map(as_ib);
                ib::split(
                    bag.req.min_memory_mb, bag.req.min_disk_mb, num_tasks, bag.requester,
                    skip_left, skip_right, left, right, left_zone, right_zone, must_go_down, is_root,
                )
            }
            Policy::Mm => {
                let left = self.left.last_received.as_ref().map(as_mm);
                let right = self.right.last_received.as_ref().map(as_mm);
                let father_max = self.father.last_received.as_ref().map(|s| as_mm(s).max_queue_end());
                mm::split(
                    bag.req.min_memory_mb, bag.req.min_disk_mb, num_tasks, bag.requester,
                    skip_left, skip_right, left, right, left_zone, right_zone,
                    now, father_max, self.mmp_beta, self.one_task_time_us, must_go_down, is_root,
                )
            }
            Policy::Dp => {
                let left = self.left.last_received.as_ref().map(as_dp);
                let right = self.right.last_received.as_ref().map(as_dp);
                dp::split(
                    bag.req.min_memory_mb, bag.req.min_disk_mb, num_tasks, bag.req.length,
                    bag.req.deadline, bag.requester, skip_left, skip_right, left, right,
                    left_zone, right_zone, must_go_down, is_root,
                )
            }
            Policy::Fsp => {
                let left = self.left.last_received.as_ref().map(as_fsp);
                let right = self.right.last_received.as_ref().map(as_fsp);
                let father_max = self.father.last_received.as_ref().map(|s| as_fsp(s).max_slowness()).unwrap_or(0.0);
                let subtree_max = match (left, right) {
                    (Some(l), Some(r)) => l.max_slowness().max(r.max_slowness()),
                    (Some(l), None) => l.max_slowness(),
                    (None, Some(r)) => r.max_slowness(),
                    (None, None) => 0.0,
                };
                let slowest_machine = match (left, right) {
                    (Some(l), Some(r)) => l.slowest_machine_slowness.max(r.slowest_machine_slowness),
                    (Some(l), None) => l.slowest_machine_slowness,
                    (None, Some(r)) => r.slowest_machine_slowness,
                    (None, None) => f64::INFINITY,
                };
                fsp::split(
                    bag.req.min_memory_mb, bag.req.min_disk_mb, num_tasks, bag.requester,
                    skip_left, skip_right, left, right, left_zone, right_zone,
                    father_max, subtree_max, slowest_machine, self.mmp_beta, must_go_down, is_root,
                )
            }
        };

        if result.dropped > 0 {
            warn!(request_id = bag.request_id, dropped = result.dropped, "no capacity anywhere in the tree, dropping tasks");
        }

        let mut out = Vec::new();
        let mut next_index = bag.first_task;
        for (count, to, child_is_leaf) in [
            (result.to_left, Destination::Left, overlay.child_is_leaf(Side::Left)),
            (result.to_right, Destination::Right, overlay.child_is_leaf(Side::Right)),
            (result.to_father, Destination::Father, false),
        ] {
            if count == 0 {
                continue;
            }
            let sub_bag = TaskBagMsg {
                first_task: next_index,
                last_task: next_index + count - 1,
                for_en: to != Destination::Father && child_is_leaf,
                from_en: false,
                ..bag.clone()
            };
            next_index += count;
            out.push(OutgoingBag { to, bag: sub_bag });
        }

        out
    }
}

fn forward_unchanged(bag: &TaskBagMsg) -> TaskBagMsg {
    TaskBagMsg { from_en: false, ..bag.clone() }
}

fn as_ib(s: &AvailabilitySummary) -> &IbSummary {
    match s {
        AvailabilitySummary::Ib(i) => i,
        _ => unreachable!("summary kind must match dispatcher policy"),
    }
}

fn as_mm(s: &AvailabilitySummary) -> &MmSummary {
    match s {
        AvailabilitySummary::Mm(m) => m,
        _ => unreachable!("summary kind must match dispatcher policy"),
    }
}

fn as_dp(s: &AvailabilitySummary) -> &DpSummary {
    match s {
        AvailabilitySummary::Dp(d) => d,
        _ => unreachable!("summary kind must match dispatcher policy"),
    }
}

fn as_fsp(s: &AvailabilitySummary) -> &FspSummary {
    match s {
        AvailabilitySummary::Fsp(f) => f,
        _ => unreachable!("summary kind must match dispatcher policy"),
    }
}
