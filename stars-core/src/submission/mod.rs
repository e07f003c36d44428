//! Submission Manager: per-submitter bookkeeping of applications, requests,
//! and per-task lifecycle, plus the search-timeout retry policy (spec.md
//! §4.4).
//!
//! Owns the [`ApplicationInstance`]/[`Request`]/[`RemoteTask`] types defined
//! in [`crate::remote_task`] — it's the only component that mutates them.
//! Each `Request` is tracked back to its owning instance through
//! `request_owner` so the `*_task` operations can take a bare `request_id`
//! the way spec.md §4.4 describes them, without the caller threading an
//! instance id through every call.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::address::Address;
use crate::error::ProtocolError;
use crate::remote_task::{ApplicationInstance, Request, RemoteTaskState};
use crate::task::TaskDescription;
use crate::time::{Duration, Time};

/// Snapshot of an instance's task-state partition (spec.md §4.4's counters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceCounters {
    pub num_ready: usize,
    pub num_searching: usize,
    pub num_executing: usize,
    pub num_finished: usize,
    pub num_in_process: usize,
}

/// Result of [`SubmissionManager::on_search_timeout`] — the retry policy's
/// outcome (spec.md §4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A new request was issued for these now-searching global task
    /// indices, with this deadline; the caller broadcasts it.
    Retried {
        request_id: u64,
        global_indices: Vec<u32>,
        deadline: Time,
    },
    /// No tasks were left to retry — the instance finished or was emptied
    /// by aborts/dead nodes while the search was in flight.
    NothingToRetry,
    /// `submit_retries` attempts were exhausted; the caller surfaces job
    /// failure.
    Exhausted,
}

struct RetryState {
    attempts: u32,
    deadline: Time,
}

/// Per-submitter state machine (spec.md §4.4).
pub struct SubmissionManager {
    submit_retries: u32,
    deadline_multiplier: f64,
    apps: HashMap<String, Arc<TaskDescription>>,
    instances: HashMap<u64, ApplicationInstance>,
    retry_state: HashMap<u64, RetryState>,
    request_owner: HashMap<u64, u64>,
    next_instance_id: u64,
    next_request_id: u64,
}

impl SubmissionManager {
    pub fn new(submit_retries: u32, deadline_multiplier: f64) -> Self {
        SubmissionManager {
            submit_retries,
            deadline_multiplier,
            apps: HashMap::new(),
            instances: HashMap::new(),
            retry_state: HashMap::new(),
            request_owner: HashMap::new(),
            next_instance_id: 1,
            next_request_id: 1,
        }
    }

    /// `createApp` (spec.md §4.4). Fails if `name` is already registered.
    pub fn create_app(&mut self, name: impl Into<String>, description: Arc<TaskDescription>) -> Result<(), ProtocolError> {
        let name = name.into();
        if self.apps.contains_key(&name) {
            return Err(ProtocolError::AppAlreadyExists(name));
        }
        self.apps.insert(name, description);
        Ok(())
    }

    /// `createInstance` (spec.md §4.4): allocate `N` RemoteTasks in `Ready`,
    /// with `deadline` overriding the template's.
    pub fn create_instance(&mut self, app_name: &str, deadline: Time, now: Time) -> Result<u64, ProtocolError> {
        let template = self
            .apps
            .get(app_name)
            .ok_or_else(|| ProtocolError::UnknownApp(app_name.to_string()))?;

        let description = Arc::new(TaskDescription {
            deadline,
            ..(**template).clone()
        });

        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instances
            .insert(id, ApplicationInstance::new(id, app_name, description, now));
        self.retry_state.insert(id, RetryState { attempts: 0, deadline });
        info!(instance_id = id, app_name, "application instance created");
        Ok(id)
    }

    /// `buildRequestFromReady` (spec.md §4.4): bundle every `Ready` task
    /// into a new Request, without yet transitioning them — that happens in
    /// [`SubmissionManager::start_search`].
    pub fn build_request_from_ready(&mut self, instance_id: u64, now: Time) -> Option<u64> {
        let inst = self.instances.get_mut(&instance_id)?;
        let global_indices: Vec<u32> = inst
            .tasks
            .iter()
            .filter(|t| t.state.is_ready())
            .map(|t| t.index)
            .collect();
        if global_indices.is_empty() {
            return None;
        }

        let id = self.next_request_id;
        self.next_request_id += 1;
        inst.requests.push(Request::new(id, now, global_indices));
        self.request_owner.insert(id, instance_id);
        Some(id)
    }

    /// Transition a just-built request's slots to `Searching`.
    pub fn start_search(&mut self, request_id: u64, now: Time) {
        let Some(&instance_id) = self.request_owner.get(&request_id) else { return };
        let Some(inst) = self.instances.get_mut(&instance_id) else { return };

        let globals: Vec<u32> = match inst.requests.iter_mut().find(|r| r.id == request_id) {
            Some(req) => {
                req.last_activity = now;
                req.local_to_global.iter().copied().filter(|&g| g != u32::MAX).collect()
            }
            None => return,
        };
        for global in globals {
            if let Some(t) = inst.tasks.get_mut((global - 1) as usize) {
                t.state = RemoteTaskState::Searching;
            }
        }
    }

    /// `cancelSearch` (spec.md §4.4): revert every still-`Searching` slot of
    /// `request_id` to `Ready` and detach it. Returns the count reverted.
    pub fn cancel_search(&mut self, request_id: u64) -> u32 {
        let Some(&instance_id) = self.request_owner.get(&request_id) else { return 0 };
        let Some(inst) = self.instances.get_mut(&instance_id) else { return 0 };

        let globals: Vec<u32> = match inst.requests.iter().find(|r| r.id == request_id) {
            Some(req) => req.local_to_global.iter().copied().filter(|&g| g != u32::MAX).collect(),
            None => return 0,
        };

        let mut reverted = 0u32;
        for &global in &globals {
            if let Some(t) = inst.tasks.get_mut((global - 1) as usize) {
                if t.state.is_searching() {
                    t.state = RemoteTaskState::Ready;
                    reverted += 1;
                }
            }
        }
        if let Some(req) = inst.requests.iter_mut().find(|r| r.id == request_id) {
            for &global in &globals {
                req.detach(global);
            }
        }
        reverted
    }

    /// `acceptedTasks` (spec.md §4.4). Out-of-range or wrong-state local ids
    /// are ignored with a warning rather than failing the whole call.
    pub fn accepted_tasks(&mut self, src: Address, request_id: u64, first_local: u32, last_local: u32, now: Time) -> u32 {
        let Some(&instance_id) = self.request_owner.get(&request_id) else {
            warn!(request_id, "acceptedTasks for unknown request");
            return 0;
        };
        let Some(inst) = self.instances.get_mut(&instance_id) else { return 0 };

        let globals: Vec<u32> = match inst.requests.iter().find(|r| r.id == request_id) {
            Some(req) => (first_local..=last_local)
                .filter_map(|l| req.local_to_global.get(l as usize).copied())
                .filter(|&g| g != u32::MAX)
                .collect(),
            None => return 0,
        };

        let mut accepted = 0u32;
        for global in &globals {
            match inst.tasks.get_mut((*global - 1) as usize) {
                Some(t) if t.state.is_searching() => {
                    t.state = RemoteTaskState::Executing { host: src };
                    accepted += 1;
                }
                Some(_) => warn!(request_id, global, "acceptedTasks for a task not Searching"),
                None => warn!(request_id, global, "acceptedTasks global index out of range"),
            }
        }

        if accepted > 0 {
            if let Some(req) = inst.requests.iter_mut().find(|r| r.id == request_id) {
                req.last_activity = now;
                req.accepted_count += accepted;
                req.accepting_hosts.insert(src);
            }
        }
        accepted
    }

    /// `finishedTask` (spec.md §4.4). Idempotent: a second call on an
    /// already-`Finished` task returns `false`.
    pub fn finished_task(&mut self, src: Address, request_id: u64, local_id: u32) -> bool {
        let Some(global) = self.executing_global(request_id, local_id, src) else { return false };
        let Some(&instance_id) = self.request_owner.get(&request_id) else { return false };
        let Some(inst) = self.instances.get_mut(&instance_id) else { return false };
        let Some(t) = inst.tasks.get_mut((global - 1) as usize) else { return false };
        t.state = RemoteTaskState::Finished;
        info!(request_id, local_id, executor = %src, "task finished");
        true
    }

    /// `abortedTask` (spec.md §4.4): symmetric to `finishedTask`, reverts to
    /// `Ready` and detaches from its request.
    pub fn aborted_task(&mut self, src: Address, request_id: u64, local_id: u32) -> bool {
        let Some(global) = self.executing_global(request_id, local_id, src) else { return false };
        let Some(&instance_id) = self.request_owner.get(&request_id) else { return false };
        let Some(inst) = self.instances.get_mut(&instance_id) else { return false };
        if let Some(t) = inst.tasks.get_mut((global - 1) as usize) {
            t.state = RemoteTaskState::Ready;
        }
        if let Some(req) = inst.requests.iter_mut().find(|r| r.id == request_id) {
            req.detach(global);
        }
        warn!(request_id, local_id, executor = %src, "task aborted");
        true
    }

    /// Resolve `request_id`/`local_id` to a global task index, checking the
    /// task is currently `Executing` with `host == src`.
    fn executing_global(&self, request_id: u64, local_id: u32, src: Address) -> Option<u32> {
        let instance_id = *self.request_owner.get(&request_id)?;
        let inst = self.instances.get(&instance_id)?;
        let global = inst.requests.iter().find(|r| r.id == request_id)?.global_index(local_id)?;
        if global == u32::MAX {
            return None;
        }
        let task = inst.tasks.get((global - 1) as usize)?;
        if task.state.executing_host() == Some(src) {
            Some(global)
        } else {
            None
        }
    }

    /// `deadNode` (spec.md §4.4): every task this peer had assigned to
    /// `addr` reverts to `Ready` and detaches from its request, across every
    /// instance this submitter owns.
    pub fn dead_node(&mut self, addr: Address) {
        for inst in self.instances.values_mut() {
            let globals: Vec<u32> = inst
                .tasks
                .iter()
                .filter(|t| t.state.executing_host() == Some(addr))
                .map(|t| t.index)
                .collect();
            for global in &globals {
                if let Some(t) = inst.tasks.get_mut((*global - 1) as usize) {
                    t.state = RemoteTaskState::Ready;
                }
                for req in inst.requests.iter_mut() {
                    req.detach(*global);
                }
            }
            if !globals.is_empty() {
                warn!(instance_id = inst.id, dead = %addr, reverted = globals.len(), "host declared dead");
            }
        }
    }

    /// The instance a request belongs to — lets the caller thread a bare
    /// `request_id` back to its owning instance for logging or bookkeeping.
    pub fn request_owner_instance(&self, request_id: u64) -> Option<u64> {
        self.request_owner.get(&request_id).copied()
    }

    /// Number of request-local slots in `request_id` — the caller uses this
    /// to form the `TaskBagMsg::{first_task, last_task}` range, which is
    /// always `0..len` for a freshly built request.
    pub fn request_len(&self, request_id: u64) -> Option<u32> {
        let instance_id = *self.request_owner.get(&request_id)?;
        let inst = self.instances.get(&instance_id)?;
        inst.requests.iter().find(|r| r.id == request_id).map(|r| r.len() as u32)
    }

    pub fn instance_description(&self, instance_id: u64) -> Option<Arc<TaskDescription>> {
        self.instances.get(&instance_id).map(|i| i.description.clone())
    }

    pub fn is_instance_finished(&self, instance_id: u64) -> Option<bool> {
        self.instances.get(&instance_id).map(|i| i.is_finished())
    }

    pub fn release_time(&self, instance_id: u64) -> Option<Time> {
        self.instances.get(&instance_id).map(|i| i.created_at)
    }

    pub fn counters(&self, instance_id: u64) -> Option<InstanceCounters> {
        self.instances.get(&instance_id).map(|i| InstanceCounters {
            num_ready: i.num_ready(),
            num_searching: i.num_searching(),
            num_executing: i.num_executing(),
            num_finished: i.num_finished(),
            num_in_process: i.num_in_process(),
        })
    }

    /// The retry policy (spec.md §4.4): on search timeout, cancel the
    /// search, and — unless `submit_retries` is exhausted — issue a new
    /// request for the now-`Ready` tasks with the deadline window widened
    /// by `deadline_multiplier`.
    pub fn on_search_timeout(&mut self, request_id: u64, now: Time) -> RetryOutcome {
        let Some(&instance_id) = self.request_owner.get(&request_id) else {
            return RetryOutcome::Exhausted;
        };
        self.cancel_search(request_id);

        let Some(state) = self.retry_state.get_mut(&instance_id) else {
            return RetryOutcome::Exhausted;
        };
        if state.attempts >= self.submit_retries {
            warn!(instance_id, request_id, "submit retries exhausted");
            return RetryOutcome::Exhausted;
        }

        let Some(inst) = self.instances.get(&instance_id) else {
            return RetryOutcome::Exhausted;
        };
        let global_indices: Vec<u32> = inst
            .tasks
            .iter()
            .filter(|t| t.state.is_ready())
            .map(|t| t.index)
            .collect();
        if global_indices.is_empty() {
            return RetryOutcome::NothingToRetry;
        }

        let span = inst.created_at.until(state.deadline);
        let widened = Duration::from_micros((span.as_micros() as f64 * self.deadline_multiplier) as u64);
        let new_deadline = now + widened;
        state.attempts += 1;
        state.deadline = new_deadline;

        let new_id = self.next_request_id;
        self.next_request_id += 1;
        let inst = self.instances.get_mut(&instance_id).unwrap();
        inst.requests.push(Request::new(new_id, now, global_indices.clone()));
        self.request_owner.insert(new_id, instance_id);
        self.start_search(new_id, now);

        info!(instance_id, new_id, attempts = self.retry_state[&instance_id].attempts, "retrying search");
        RetryOutcome::Retried {
            request_id: new_id,
            global_indices,
            deadline: new_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    fn desc() -> Arc<TaskDescription> {
        Arc::new(TaskDescription {
            min_memory_mb: 128,
            min_disk_mb: 64,
            num_tasks: 3,
            length: 1_000,
            input_bytes: 0,
            output_bytes: 0,
            deadline: Time::from_micros(10_000),
        })
    }

    fn setup() -> (SubmissionManager, u64) {
        let mut mgr = SubmissionManager::new(2, 2.0);
        mgr.create_app("render", desc()).unwrap();
        let instance_id = mgr.create_instance("render", Time::from_micros(10_000), Time::ZERO).unwrap();
        (mgr, instance_id)
    }

    #[test]
    fn create_app_rejects_a_duplicate_name() {
        let mut mgr = SubmissionManager::new(2, 2.0);
        mgr.create_app("render", desc()).unwrap();
        let err = mgr.create_app("render", desc()).unwrap_err();
        assert!(matches!(err, ProtocolError::AppAlreadyExists(_)));
    }

    #[test]
    fn build_request_then_start_search_transitions_every_slot() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);
        let c = mgr.counters(instance_id).unwrap();
        assert_eq!(c.num_searching, 3);
        assert_eq!(c.num_ready, 0);
    }

    #[test]
    fn accepted_tasks_moves_slots_to_executing() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);
        let accepted = mgr.accepted_tasks(addr(5), req_id, 0, 1, Time::from_micros(10));
        assert_eq!(accepted, 2);
        let c = mgr.counters(instance_id).unwrap();
        assert_eq!(c.num_executing, 2);
        assert_eq!(c.num_searching, 1);
    }

    #[test]
    fn finished_task_requires_matching_host_and_is_idempotent() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);
        mgr.accepted_tasks(addr(5), req_id, 0, 0, Time::from_micros(10));

        assert!(!mgr.finished_task(addr(6), req_id, 0), "wrong host must not finish it");
        assert!(mgr.finished_task(addr(5), req_id, 0));
        assert!(!mgr.finished_task(addr(5), req_id, 0), "already finished");
        assert_eq!(mgr.counters(instance_id).unwrap().num_finished, 1);
    }

    #[test]
    fn dead_node_reverts_every_task_it_held() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);
        mgr.accepted_tasks(addr(5), req_id, 0, 2, Time::from_micros(10));

        mgr.dead_node(addr(5));
        let c = mgr.counters(instance_id).unwrap();
        assert_eq!(c.num_ready, 3);
        assert_eq!(c.num_executing, 0);
    }

    #[test]
    fn search_timeout_retries_with_a_widened_deadline() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);

        let outcome = mgr.on_search_timeout(req_id, Time::from_micros(10_000));
        match outcome {
            RetryOutcome::Retried { global_indices, deadline, .. } => {
                assert_eq!(global_indices.len(), 3);
                assert_eq!(deadline, Time::from_micros(10_000 + 20_000));
            }
            other => panic!("expected Retried, got {other:?}"),
        }
        assert_eq!(mgr.counters(instance_id).unwrap().num_searching, 3);
    }

    #[test]
    fn search_timeout_is_exhausted_after_submit_retries_attempts() {
        let (mut mgr, instance_id) = setup();
        let mut req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);

        for _ in 0..2 {
            match mgr.on_search_timeout(req_id, Time::from_micros(10_000)) {
                RetryOutcome::Retried { request_id, .. } => req_id = request_id,
                other => panic!("expected Retried, got {other:?}"),
            }
        }
        assert_eq!(
            mgr.on_search_timeout(req_id, Time::from_micros(10_000)),
            RetryOutcome::Exhausted
        );
    }

    #[test]
    fn cancel_search_reverts_searching_slots_only() {
        let (mut mgr, instance_id) = setup();
        let req_id = mgr.build_request_from_ready(instance_id, Time::ZERO).unwrap();
        mgr.start_search(req_id, Time::ZERO);
        mgr.accepted_tasks(addr(5), req_id, 0, 0, Time::from_micros(10));

        let reverted = mgr.cancel_search(req_id);
        assert_eq!(reverted, 2, "only the two still-Searching slots revert");
        let c = mgr.counters(instance_id).unwrap();
        assert_eq!(c.num_ready, 2);
        assert_eq!(c.num_executing, 1);
    }
}
