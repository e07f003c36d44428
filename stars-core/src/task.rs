//! Task data structures for the local (executor-side) half of the pipeline.
//!
//! Two types model the two sides, following the dual-representation pattern
//! the teacher's own `task.rs` uses for `Task`/`SchedTask`:
//!
//! ```text
//! TaskDescription (static, per-application) ──► Task (per-leaf, mutable)
//! ```
//!
//! `TaskDescription` is immutable after application creation (spec.md §3);
//! `Task` is the leaf-local working copy that moves through
//! `Created → Running → Finished | Aborted`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::time::{Duration, Time};

/// Static, per-application requirements shared by every task in one bag —
/// bag-of-tasks applications are homogeneous and interchangeable (see
/// GLOSSARY), so one `TaskDescription` describes all `num_tasks` of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Minimum memory (MB) a host must have free to run one task.
    pub min_memory_mb: u64,
    /// Minimum disk (MB) a host must have free to run one task.
    pub min_disk_mb: u64,
    /// Number of tasks in the bag.
    pub num_tasks: u32,
    /// Compute units required per task (used with a host's `power` to
    /// estimate run time: `length / power`).
    pub length: u64,
    /// Input bytes per task.
    pub input_bytes: u64,
    /// Output bytes per task.
    pub output_bytes: u64,
    /// Absolute deadline shared by every task in the bag.
    pub deadline: Time,
}

impl TaskDescription {
    /// Estimated run time of one task on a host with the given `power`
    /// (compute units per microsecond). Returns `Duration(0)` for
    /// non-positive power rather than dividing by zero.
    pub fn estimated_runtime(&self, power: f64) -> Duration {
        if power <= 0.0 {
            Duration::from_micros(0)
        } else {
            Duration::from_micros((self.length as f64 / power) as u64)
        }
    }
}

/// Lifecycle of a task local to one leaf.
///
/// `Ready→Running` on dequeue, `Running→Finished` on completion,
/// `Running→Aborted` / `Pending(Created)→Aborted` on abort (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted, waiting in the leaf's queue.
    Created,
    /// The single task a leaf may run at a time.
    Running,
    Finished,
    Aborted,
}

/// A task accepted by one leaf, belonging to one (owner, request, index)
/// tuple on the submitter side.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// The submitter that owns this task.
    pub owner: Address,
    /// The submitter-assigned request id this task arrived with.
    pub request_id: u64,
    /// The submitter-local task index within the request.
    pub task_index: u32,
    /// Shared, immutable per-application requirements.
    pub description: Arc<TaskDescription>,
    pub state: TaskState,
}

impl Task {
    pub fn new(
        owner: Address,
        request_id: u64,
        task_index: u32,
        description: Arc<TaskDescription>,
    ) -> Self {
        Task {
            owner,
            request_id,
            task_index,
            description,
            state: TaskState::Created,
        }
    }

    /// Estimated run time on a host with the given `power`.
    pub fn estimated_runtime(&self, power: f64) -> Duration {
        self.description.estimated_runtime(power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn desc(length: u64, deadline_us: u64) -> Arc<TaskDescription> {
        Arc::new(TaskDescription {
            min_memory_mb: 128,
            min_disk_mb: 64,
            num_tasks: 5,
            length,
            input_bytes: 0,
            output_bytes: 0,
            deadline: Time::from_micros(deadline_us),
        })
    }

    #[test]
    fn estimated_runtime_divides_length_by_power() {
        let d = desc(1_000, 10_000);
        assert_eq!(d.estimated_runtime(2.0), Duration::from_micros(500));
    }

    #[test]
    fn estimated_runtime_zero_power_is_zero_not_panic() {
        let d = desc(1_000, 10_000);
        assert_eq!(d.estimated_runtime(0.0), Duration::from_micros(0));
    }

    #[test]
    fn new_task_starts_created() {
        let owner = Address::new(Ipv4Addr::new(10, 0, 0, 1), 9000);
        let t = Task::new(owner, 1, 1, desc(1_000, 10_000));
        assert_eq!(t.state, TaskState::Created);
        assert_eq!(t.owner, owner);
    }
}
