//! Local scheduler: the per-leaf component that accepts, orders, and runs
//! tasks while publishing an availability summary upward (spec.md §4.1).
//!
//! `LocalScheduler` is a pure state machine — it never touches a
//! `Transport` itself. The owning [`crate::peer::Peer`] drives it: calling
//! `tick()` to start the head of the queue, arming a timer for the
//! estimated finish time, and calling `complete_running()` when that timer
//! fires.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::Policy;
use crate::error::ResourceError;
use crate::summary::dp::DpCluster;
use crate::summary::fsp::FspCluster;
use crate::summary::mm::MmCluster;
use crate::summary::{AvailabilitySummary, DpSummary, FspSummary, IbSummary, MmSummary};
use crate::task::{Task, TaskDescription, TaskState};
use crate::time::{Duration, Time};

/// What the leaf should do as a result of calling [`LocalScheduler::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// A task started running; arm a timer for `finishes_at` and call
    /// [`LocalScheduler::complete_running`] when it fires.
    Started { task: Task, finishes_at: Time },
}

/// The per-leaf local scheduler (spec.md §4.1).
pub struct LocalScheduler {
    policy: Policy,
    own_addr: Address,
    /// Compute units processed per microsecond on this host.
    power: f64,
    free_memory_mb: u64,
    free_disk_mb: u64,
    queue: VecDeque<Task>,
    running: Option<(Task, Time)>, // (task, started_at)
}

impl LocalScheduler {
    pub fn new(policy: Policy, own_addr: Address, power: f64, free_memory_mb: u64, free_disk_mb: u64) -> Self {
        LocalScheduler {
            policy,
            own_addr,
            power,
            free_memory_mb,
            free_disk_mb,
            queue: VecDeque::new(),
            running: None,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len() + self.running.is_some() as usize
    }

    /// Accept a bag of tasks addressed to this leaf (spec.md §4.1).
    /// Returns the number of tasks actually admitted. `ResourceError` only
    /// when this leaf cannot host a single task of the bag's requirements
    /// at all — DP's partial-prefix rejection is not an error, it's a
    /// smaller acceptance count.
    pub fn accept(
        &mut self,
        owner: Address,
        request_id: u64,
        first_task: u32,
        last_task: u32,
        description: Arc<TaskDescription>,
    ) -> Result<u32, ResourceError> {
        if description.min_memory_mb > self.free_memory_mb {
            return Err(ResourceError::InsufficientMemory {
                required_mb: description.min_memory_mb,
                available_mb: self.free_memory_mb,
            });
        }
        if description.min_disk_mb > self.free_disk_mb {
            return Err(ResourceError::InsufficientDisk {
                required_mb: description.min_disk_mb,
                available_mb: self.free_disk_mb,
            });
        }

        let candidates: Vec<Task> = (first_task..=last_task)
            .map(|idx| Task::new(owner, request_id, idx, description.clone()))
            .collect();

        let accepted = match self.policy {
            Policy::Ib | Policy::Mm | Policy::Fsp => {
                let count = candidates.len() as u32;
                self.queue.extend(candidates);
                count
            }
            Policy::Dp => self.accept_dp_prefix(candidates),
        };

        self.reschedule();
        debug!(accepted, policy = ?self.policy, "leaf accepted tasks");
        Ok(accepted)
    }

    /// DP's admission rule: sort pending + new tasks by deadline and keep
    /// the largest feasible prefix, assuming sequential execution starting
    /// at the current queue end (spec.md §4.1).
    fn accept_dp_prefix(&mut self, new_tasks: Vec<Task>) -> u32 {
        let new_request_id = new_tasks.first().map(|t| t.request_id);
        let mut combined: Vec<Task> = self.queue.drain(..).collect();
        combined.extend(new_tasks);
        combined.sort_by_key(|t| t.description.deadline);

        let mut elapsed = Duration::from_micros(0);
        let mut kept = Vec::with_capacity(combined.len());
        for task in combined {
            let runtime = task.estimated_runtime(self.power);
            let candidate_elapsed = Duration::from_micros(elapsed.as_micros() + runtime.as_micros());
            let finishes_at = Time::ZERO + candidate_elapsed;
            if finishes_at <= task.description.deadline {
                elapsed = candidate_elapsed;
                kept.push(task);
            } else {
                // Largest feasible *prefix*: stop at the first infeasible
                // task in deadline order rather than skipping it.
                break;
            }
        }

        let accepted = kept
            .iter()
            .filter(|t| Some(t.request_id) == new_request_id)
            .count() as u32;
        self.queue = kept.into();
        accepted
    }

    /// Restore queue order after a mutation (spec.md §4.1). Idempotent.
    pub fn reschedule(&mut self) {
        match self.policy {
            Policy::Ib | Policy::Mm => {
                // Insertion order is already maintained by `VecDeque`.
            }
            Policy::Dp => {
                let mut v: Vec<Task> = self.queue.drain(..).collect();
                v.sort_by_key(|t| t.description.deadline);
                self.queue = v.into();
            }
            Policy::Fsp => {
                let v: Vec<Task> = self.queue.drain(..).collect();
                self.queue = round_robin_by_owner(v).into();
            }
        }
    }

    /// If no task is running, dequeue the head and start it (spec.md
    /// §4.1). Returns `None` when there is nothing to do.
    pub fn tick(&mut self, now: Time) -> Option<TickAction> {
        if self.running.is_some() {
            return None;
        }
        let task = self.queue.pop_front()?;
        let runtime = task.estimated_runtime(self.power);
        let finishes_at = now + runtime;
        let mut started = task.clone();
        started.state = TaskState::Running;
        self.running = Some((started.clone(), now));
        info!(owner = %started.owner, request_id = started.request_id, task_index = started.task_index, "task started");
        Some(TickAction::Started { task: started, finishes_at })
    }

    /// The running task finished (its timer fired). Transitions it to
    /// `Finished`, reschedules, and returns it for the `TaskFinished`
    /// notification. `None` if nothing was running (a stale timer).
    pub fn complete_running(&mut self) -> Option<Task> {
        let (mut task, _) = self.running.take()?;
        task.state = TaskState::Finished;
        self.reschedule();
        info!(owner = %task.owner, request_id = task.request_id, task_index = task.task_index, "task finished");
        Some(task)
    }

    /// Stop a running or pending task and transition it to `Aborted`
    /// (spec.md §4.1). Returns the task for the `TaskAborted` notification.
    pub fn abort(&mut self, owner: Address, request_id: u64, task_index: u32) -> Option<Task> {
        if let Some((task, _)) = &self.running {
            if task.owner == owner && task.request_id == request_id && task.task_index == task_index {
                let (mut task, _) = self.running.take().unwrap();
                task.state = TaskState::Aborted;
                warn!(owner = %owner, request_id, task_index, "running task aborted");
                return Some(task);
            }
        }
        if let Some(pos) = self.queue.iter().position(|t| {
            t.owner == owner && t.request_id == request_id && t.task_index == task_index
        }) {
            let mut task = self.queue.remove(pos).unwrap();
            task.state = TaskState::Aborted;
            warn!(owner = %owner, request_id, task_index, "pending task aborted");
            return Some(task);
        }
        None
    }

    /// Total estimated time (microseconds) until this leaf's queue drains,
    /// relative to `now` — used as MM's queue-end time and DP's deadline
    /// slack baseline.
    fn queue_drain_time(&self, now: Time) -> Duration {
        let mut total = Duration::from_micros(0);
        if let Some((task, started_at)) = &self.running {
            let runtime = task.estimated_runtime(self.power);
            let elapsed = started_at.until(now);
            total = Duration::from_micros(runtime.as_micros().saturating_sub(elapsed.as_micros()));
        }
        for task in &self.queue {
            total = Duration::from_micros(total.as_micros() + task.estimated_runtime(self.power).as_micros());
        }
        total
    }

    /// Policy-specific projection of this leaf's state (spec.md §4.1).
    pub fn current_summary(&self, now: Time) -> AvailabilitySummary {
        match self.policy {
            Policy::Ib => AvailabilitySummary::Ib(IbSummary::new(
                self.free_memory_mb,
                self.free_disk_mb,
                self.power,
            )),
            Policy::Mm => {
                let queue_end = (now + self.queue_drain_time(now)).as_micros();
                AvailabilitySummary::Mm(MmSummary::new(vec![MmCluster::singleton(
                    self.free_memory_mb,
                    self.free_disk_mb,
                    self.power,
                    queue_end,
                )]))
            }
            Policy::Dp => {
                let drain = self.queue_drain_time(now);
                let busy_until = now + drain;
                // Sample availability at a few multiples of the busy
                // horizon, matching "sampled at reference deadlines"
                // (spec.md §3).
                let samples = (1..=4u64)
                    .map(|m| {
                        let t = now + Duration::from_micros(busy_until.as_micros() * m);
                        let available_units = if t > busy_until {
                            ((t - busy_until).as_micros() as f64 * self.power) as u64
                        } else {
                            0
                        };
                        (t, available_units)
                    })
                    .collect();
                AvailabilitySummary::Dp(DpSummary::new(vec![DpCluster::new(
                    self.free_memory_mb,
                    self.free_disk_mb,
                    samples,
                    1,
                )]))
            }
            Policy::Fsp => {
                // Simplified: the slowness table is expressed for a
                // reference unit-length task (`a = 1`); marginal slowness
                // per extra task is the queue's current busy time plus one
                // more unit of work, matching the linear skeleton of
                // spec.md §4.3 without modelling every possible `a`.
                let busy = self.queue_drain_time(now).as_micros() as f64;
                let zvalues: Vec<f64> = (1..=8)
                    .map(|tpn| busy * self.power + tpn as f64)
                    .collect();
                let cluster = FspCluster::new(self.free_memory_mb, self.free_disk_mb, zvalues, 1);
                let slowest_machine = cluster.z(self.queue_len() as u32 + 1);
                AvailabilitySummary::Fsp(FspSummary::new(vec![cluster], slowest_machine))
            }
        }
    }

    pub fn own_addr(&self) -> Address {
        self.own_addr
    }

    /// Outstanding task counts per `(owner, request)` currently held at
    /// this leaf (running + queued) — feeds the leaf→submitter heartbeat
    /// (spec.md §3/§6's `Heartbeat` message).
    pub fn remaining_by_request(&self) -> Vec<(Address, u64, u32)> {
        use std::collections::HashMap;

        let mut counts: HashMap<(Address, u64), u32> = HashMap::new();
        let mut order = Vec::new();
        let mut bump = |owner: Address, request_id: u64| {
            let key = (owner, request_id);
            if !counts.contains_key(&key) {
                order.push(key);
            }
            *counts.entry(key).or_insert(0) += 1;
        };

        if let Some((task, _)) = &self.running {
            bump(task.owner, task.request_id);
        }
        for task in &self.queue {
            bump(task.owner, task.request_id);
        }

        order.into_iter().map(|key| (key.0, key.1, counts[&key])).collect()
    }
}

/// FSP's fairness approximation: interleave each owner's tasks round-robin
/// while preserving each owner's internal creation order, so no single
/// submitter's backlog monopolizes the front of the queue.
fn round_robin_by_owner(tasks: Vec<Task>) -> VecDeque<Task> {
    use std::collections::HashMap;

    let mut by_owner: HashMap<Address, VecDeque<Task>> = HashMap::new();
    let mut owner_order = Vec::new();
    for task in tasks {
        if !by_owner.contains_key(&task.owner) {
            owner_order.push(task.owner);
        }
        by_owner.entry(task.owner).or_default().push_back(task);
    }

    let mut result = VecDeque::new();
    loop {
        let mut progressed = false;
        for owner in &owner_order {
            if let Some(queue) = by_owner.get_mut(owner) {
                if let Some(task) = queue.pop_front() {
                    result.push_back(task);
                    progressed = true;
                }
            }
        }
        if !progressed {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    fn desc(length: u64, deadline_us: u64) -> Arc<TaskDescription> {
        Arc::new(TaskDescription {
            min_memory_mb: 128,
            min_disk_mb: 64,
            num_tasks: 1,
            length,
            input_bytes: 0,
            output_bytes: 0,
            deadline: Time::from_micros(deadline_us),
        })
    }

    #[test]
    fn ib_accepts_every_task_in_the_bag() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 1.0, 1024, 1024);
        let accepted = s.accept(addr(2), 1, 1, 5, desc(100, 10_000)).unwrap();
        assert_eq!(accepted, 5);
        assert_eq!(s.queue_len(), 5);
    }

    #[test]
    fn insufficient_memory_is_rejected() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 1.0, 64, 1024);
        let err = s.accept(addr(2), 1, 1, 1, desc(100, 10_000)).unwrap_err();
        assert!(matches!(err, ResourceError::InsufficientMemory { .. }));
    }

    #[test]
    fn dp_rejects_a_task_that_cannot_meet_its_own_deadline() {
        let mut s = LocalScheduler::new(Policy::Dp, addr(1), 1.0, 1024, 1024);
        let accepted = s.accept(addr(2), 1, 1, 1, desc(100, 50)).unwrap();
        assert_eq!(accepted, 0, "runtime 100us exceeds the 50us deadline");
    }

    #[test]
    fn dp_accepts_feasible_chain_in_deadline_order() {
        let mut s = LocalScheduler::new(Policy::Dp, addr(1), 1.0, 1024, 1024);
        let accepted = s.accept(addr(2), 1, 1, 1, desc(100, 1_000)).unwrap();
        assert_eq!(accepted, 1);
        let accepted2 = s.accept(addr(2), 2, 1, 1, desc(100, 2_000)).unwrap();
        assert_eq!(accepted2, 1);
    }

    #[test]
    fn tick_starts_head_of_queue_and_arms_a_finish_time() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 2.0, 1024, 1024);
        s.accept(addr(2), 1, 1, 1, desc(1000, 10_000)).unwrap();
        let action = s.tick(Time::from_micros(0)).unwrap();
        match action {
            TickAction::Started { finishes_at, .. } => {
                assert_eq!(finishes_at, Time::from_micros(500));
            }
        }
    }

    #[test]
    fn tick_does_nothing_while_a_task_is_running() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 1.0, 1024, 1024);
        s.accept(addr(2), 1, 1, 2, desc(100, 10_000)).unwrap();
        s.tick(Time::from_micros(0));
        assert!(s.tick(Time::from_micros(10)).is_none());
    }

    #[test]
    fn complete_running_transitions_to_finished() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 1.0, 1024, 1024);
        s.accept(addr(2), 1, 1, 1, desc(100, 10_000)).unwrap();
        s.tick(Time::from_micros(0));
        let finished = s.complete_running().unwrap();
        assert_eq!(finished.state, TaskState::Finished);
        assert!(s.complete_running().is_none());
    }

    #[test]
    fn abort_removes_pending_task() {
        let mut s = LocalScheduler::new(Policy::Ib, addr(1), 1.0, 1024, 1024);
        s.accept(addr(2), 1, 1, 2, desc(100, 10_000)).unwrap();
        let aborted = s.abort(addr(2), 1, 2).unwrap();
        assert_eq!(aborted.state, TaskState::Aborted);
        assert_eq!(s.queue_len(), 1);
    }

    #[test]
    fn fsp_round_robins_across_owners() {
        let mut s = LocalScheduler::new(Policy::Fsp, addr(1), 1.0, 1024, 1024);
        s.accept(addr(2), 1, 1, 2, desc(100, 10_000)).unwrap();
        s.accept(addr(3), 2, 1, 1, desc(100, 10_000)).unwrap();
        // owner 2 has two tasks, owner 3 has one; round robin interleaves
        // them rather than draining owner 2 first.
        let first = s.tick(Time::from_micros(0)).unwrap();
        match first {
            TickAction::Started { task, .. } => assert_eq!(task.owner, addr(2)),
        }
    }

    #[test]
    fn current_summary_matches_policy_tag() {
        let s = LocalScheduler::new(Policy::Mm, addr(1), 1.0, 1024, 1024);
        assert_eq!(s.current_summary(Time::ZERO).policy(), Policy::Mm);
    }
}
