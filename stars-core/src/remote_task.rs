//! Submitter-side task and application bookkeeping.
//!
//! `RemoteTask`, `Request` and `ApplicationInstance` mirror the original
//! `TaskBagAppDatabase` (`include/TaskBagAppDatabase.hpp`,
//! `src/lib/Database/TaskBagAppDatabase.cpp`), split into the three typed
//! structures spec.md §3 describes, and driven by
//! [`crate::submission::SubmissionManager`].

use std::collections::HashSet;
use std::sync::Arc;

use crate::address::Address;
use crate::task::TaskDescription;
use crate::time::Time;

/// Per-(application instance, task index) state observed from the
/// submitter. `Searching → Ready` on search cancel; `Executing → Ready` on
/// abort or host death (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteTaskState {
    Ready,
    Searching,
    /// Carries the executing host — the `Executing ⇒ host is set`
    /// invariant (spec.md §8) is enforced by construction: there is no
    /// `Executing` variant without one.
    Executing { host: Address },
    Finished,
}

impl RemoteTaskState {
    pub fn is_ready(&self) -> bool {
        matches!(self, RemoteTaskState::Ready)
    }

    pub fn is_searching(&self) -> bool {
        matches!(self, RemoteTaskState::Searching)
    }

    pub fn executing_host(&self) -> Option<Address> {
        match self {
            RemoteTaskState::Executing { host } => Some(*host),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RemoteTaskState::Finished)
    }
}

/// One task slot within an [`ApplicationInstance`], indexed `1..=N`.
#[derive(Debug, Clone)]
pub struct RemoteTask {
    /// 1-based index within the owning instance.
    pub index: u32,
    pub state: RemoteTaskState,
}

impl RemoteTask {
    pub fn new(index: u32) -> Self {
        RemoteTask {
            index,
            state: RemoteTaskState::Ready,
        }
    }
}

/// A bundle of `Ready` tasks submitted together for routing (spec.md §3).
#[derive(Debug, Clone)]
pub struct Request {
    pub id: u64,
    pub release_time: Time,
    pub last_activity: Time,
    /// request-local task id ↔ index into the owning instance's task vector.
    pub local_to_global: Vec<u32>,
    pub accepted_count: u32,
    pub accepting_hosts: HashSet<Address>,
}

impl Request {
    pub fn new(id: u64, release_time: Time, global_indices: Vec<u32>) -> Self {
        Request {
            id,
            release_time,
            last_activity: release_time,
            local_to_global: global_indices,
            accepted_count: 0,
            accepting_hosts: HashSet::new(),
        }
    }

    /// Number of request-local slots still mapped to a task (slots removed
    /// by cancellation or host death leave a hole, represented as `None` in
    /// spec.md prose and here as removal from the vector — callers index
    /// via [`Request::global_index`]).
    pub fn len(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_to_global.is_empty()
    }

    pub fn global_index(&self, local_id: u32) -> Option<u32> {
        self.local_to_global.get(local_id as usize).copied()
    }

    /// Detach a slot — the request "ignores that slot" from then on
    /// (spec.md §3's Request definition). Implemented as a tombstone rather
    /// than a vector removal so existing `local_id`s stay valid.
    pub fn detach(&mut self, global_index: u32) {
        for slot in self.local_to_global.iter_mut() {
            if *slot == global_index {
                // A request-local id can never legitimately collide with
                // u32::MAX given realistic task counts; use it as a
                // tombstone sentinel.
                *slot = u32::MAX;
            }
        }
    }
}

/// Belongs to a submitter: a `TaskDescription`, its remote task vector, and
/// the outstanding requests routing them (spec.md §3).
#[derive(Debug, Clone)]
pub struct ApplicationInstance {
    pub id: u64,
    pub app_name: String,
    pub description: Arc<TaskDescription>,
    pub created_at: Time,
    /// Indexed `0..N`; `RemoteTask::index` is the matching 1-based id.
    pub tasks: Vec<RemoteTask>,
    pub requests: Vec<Request>,
}

impl ApplicationInstance {
    pub fn new(
        id: u64,
        app_name: impl Into<String>,
        description: Arc<TaskDescription>,
        created_at: Time,
    ) -> Self {
        let num_tasks = description.num_tasks;
        let tasks = (1..=num_tasks).map(RemoteTask::new).collect();
        ApplicationInstance {
            id,
            app_name: app_name.into(),
            description,
            created_at,
            tasks,
            requests: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_finished())
    }

    pub fn num_ready(&self) -> usize {
        self.tasks.iter().filter(|t| t.state.is_ready()).count()
    }

    pub fn num_searching(&self) -> usize {
        self.tasks.iter().filter(|t| t.state.is_searching()).count()
    }

    pub fn num_executing(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state.executing_host().is_some())
            .count()
    }

    pub fn num_finished(&self) -> usize {
        self.tasks.iter().filter(|t| t.state.is_finished()).count()
    }

    /// Tasks not yet `Finished` — `Ready + Searching + Executing`.
    pub fn num_in_process(&self) -> usize {
        self.tasks.len() - self.num_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn desc(num_tasks: u32) -> Arc<TaskDescription> {
        Arc::new(TaskDescription {
            min_memory_mb: 1,
            min_disk_mb: 1,
            num_tasks,
            length: 100,
            input_bytes: 0,
            output_bytes: 0,
            deadline: Time::from_micros(1_000_000),
        })
    }

    #[test]
    fn new_instance_has_all_tasks_ready() {
        let inst = ApplicationInstance::new(1, "app", desc(5), Time::ZERO);
        assert_eq!(inst.tasks.len(), 5);
        assert_eq!(inst.num_ready(), 5);
        assert!(!inst.is_finished());
    }

    #[test]
    fn instance_finished_requires_all_tasks_finished() {
        let mut inst = ApplicationInstance::new(1, "app", desc(2), Time::ZERO);
        inst.tasks[0].state = RemoteTaskState::Finished;
        assert!(!inst.is_finished());
        inst.tasks[1].state = RemoteTaskState::Finished;
        assert!(inst.is_finished());
    }

    #[test]
    fn executing_state_always_carries_a_host() {
        let host = Address::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
        let state = RemoteTaskState::Executing { host };
        assert_eq!(state.executing_host(), Some(host));
    }

    #[test]
    fn request_detach_tombstones_the_slot() {
        let mut req = Request::new(1, Time::ZERO, vec![1, 2, 3]);
        req.detach(2);
        assert_eq!(req.global_index(0), Some(1));
        assert_eq!(req.global_index(1), Some(u32::MAX));
        assert_eq!(req.global_index(2), Some(3));
    }

    #[test]
    fn counters_partition_the_task_set() {
        let host = Address::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
        let mut inst = ApplicationInstance::new(1, "app", desc(4), Time::ZERO);
        inst.tasks[0].state = RemoteTaskState::Searching;
        inst.tasks[1].state = RemoteTaskState::Executing { host };
        inst.tasks[2].state = RemoteTaskState::Finished;
        assert_eq!(inst.num_ready(), 1);
        assert_eq!(inst.num_searching(), 1);
        assert_eq!(inst.num_executing(), 1);
        assert_eq!(inst.num_finished(), 1);
        assert_eq!(inst.num_in_process(), 3);
    }
}
