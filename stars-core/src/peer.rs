//! Peer: the per-process event loop tying every component together
//! (spec.md §5).
//!
//! A single-threaded, single-writer loop. `Peer::run` pulls one `Event` at
//! a time off its `Transport` and dispatches it to whichever component
//! owns that kind of state: the Local Scheduler at a leaf, the Dispatcher
//! at an interior node, and the Submission Manager whenever this peer
//! originates work of its own via a `DispatchCommand`. Nothing else
//! touches that state concurrently — a timer firing only ever enqueues an
//! `Event::Timer`, it never calls into scheduler state directly (see
//! `transport::LoopbackTransport::fire_due_timers`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::Config;
use crate::dispatcher::{Destination, Dispatcher, OutgoingBag, Side};
use crate::envelope::{
    AvailabilityUpdateMsg, DispatchCommandMsg, Envelope, HeartbeatMsg, TaskAbortedMsg,
    TaskAcceptedMsg, TaskBagMsg, TaskFinishedMsg,
};
use crate::error::ProtocolError;
use crate::overlay::OverlayAdapter;
use crate::propagation::{PropagationGate, PublishDecision};
use crate::scheduler::{LocalScheduler, TickAction};
use crate::submission::{RetryOutcome, SubmissionManager};
use crate::summary::AvailabilitySummary;
use crate::task::TaskDescription;
use crate::time::{Duration, Time};
use crate::timer::TimerId;
use crate::transport::{Event, Transport};

/// Equality-within-threshold tolerance used for a leaf's own publish
/// suppression (the Dispatcher keeps its own per-link threshold state;
/// this is the Leaf-side counterpart). spec.md §6 doesn't expose a config
/// key for this, so it's a fixed constant — see DESIGN.md.
const EQUALITY_THRESHOLD: f64 = 1.0;

/// What this peer actually is in the overlay tree. Either half still
/// shares the Submission Manager and the propagation gate below — any
/// peer can also originate its own work via `DispatchCommand`.
enum Role {
    Leaf(LocalScheduler),
    Dispatcher(Dispatcher),
}

/// Which concern a pending timer belongs to, so `handle_timer` can react
/// without a second id-keyed lookup table per concern.
enum Armed {
    /// A leaf's running task is expected to finish.
    TaskFinish,
    /// A submitter's request has been searching too long.
    RequestTimeout { request_id: u64 },
    /// Retry a throttled availability-summary publish.
    PublishRetry,
    /// Leaf → submitter heartbeat tick.
    HeartbeatSend,
    /// Submitter's periodic check for silent (presumed dead) executors.
    HeartbeatCheck,
}

/// One peer process: its position in the tree (`overlay`), its transport,
/// and every component its role requires (spec.md §5).
pub struct Peer<O: OverlayAdapter, T: Transport> {
    own_addr: Address,
    config: Config,
    overlay: O,
    transport: T,
    role: Role,
    submission: SubmissionManager,
    propagation: PropagationGate,
    timers: HashMap<TimerId, Armed>,
    /// Last time this peer heard from each executor it has outstanding
    /// tasks with, as a submitter (spec.md §3's `Heartbeat` message).
    last_heartbeat: HashMap<Address, Time>,
    /// A leaf's own last-published summary, for change-detection the way
    /// the Dispatcher already does per link.
    leaf_last_published: Option<AvailabilitySummary>,
    next_sequence: u64,
}

impl<O: OverlayAdapter, T: Transport> Peer<O, T> {
    /// Construct a peer positioned at an execution leaf.
    pub fn new_leaf(own_addr: Address, config: Config, overlay: O, transport: T, power: f64) -> Self {
        let scheduler = LocalScheduler::new(config.policy, own_addr, power, config.avail_mem, config.avail_disk);
        Self::new(own_addr, config, overlay, transport, Role::Leaf(scheduler))
    }

    /// Construct a peer positioned at an interior dispatcher node.
    /// `one_task_time_us` is MM's per-task baseline estimate; spec.md §6
    /// doesn't expose a config key for it, so it's supplied by the caller
    /// (see DESIGN.md).
    pub fn new_dispatcher(own_addr: Address, config: Config, overlay: O, transport: T, one_task_time_us: u64) -> Self {
        let dispatcher = Dispatcher::new(config.policy, config.mmp_beta, EQUALITY_THRESHOLD, one_task_time_us);
        Self::new(own_addr, config, overlay, transport, Role::Dispatcher(dispatcher))
    }

    fn new(own_addr: Address, config: Config, overlay: O, transport: T, role: Role) -> Self {
        let submission = SubmissionManager::new(config.submit_retries, config.deadline_multiplier);
        let propagation = PropagationGate::new(config.update_bw, Time::ZERO);
        Peer {
            own_addr,
            config,
            overlay,
            transport,
            role,
            submission,
            propagation,
            timers: HashMap::new(),
            last_heartbeat: HashMap::new(),
            leaf_last_published: None,
            next_sequence: 0,
        }
    }

    pub fn own_addr(&self) -> Address {
        self.own_addr
    }

    /// `createApp` (spec.md §4.4): register an application template before
    /// the event loop starts. A `DispatchCommand` only names the template
    /// and a deadline, so the template itself must already be known.
    pub fn register_app(&mut self, name: impl Into<String>, description: Arc<TaskDescription>) -> Result<(), ProtocolError> {
        self.submission.create_app(name, description)
    }

    /// Arm the recurring timers this peer's role requires, then run the
    /// blocking event loop until the transport shuts down.
    pub fn run(&mut self) {
        self.start();
        while let Some(event) = self.transport.recv() {
            match event {
                Event::Message(env) => self.handle_envelope(env),
                Event::Timer(id) => {
                    let now = self.now();
                    self.handle_timer(id, now);
                }
            }
        }
        info!(peer = %self.own_addr, "event loop shut down");
    }

    fn start(&mut self) {
        let now = self.now();
        if matches!(self.role, Role::Leaf(_)) {
            self.arm_heartbeat_send(now);
        }
        self.arm_heartbeat_check(now);
    }

    /// Wall-clock time, in microseconds since `UNIX_EPOCH` — the
    /// production reading of `Time` (see `time.rs`'s doc comment;
    /// simulation harnesses supply their own clock instead of a `Peer`).
    fn now(&self) -> Time {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Time::from_micros(since_epoch.as_micros() as u64)
    }

    fn handle_envelope(&mut self, env: Envelope) {
        let now = self.now();
        match env {
            Envelope::TaskBag(src, msg) => self.dispatch_bag(src, msg, now),
            Envelope::TaskAccepted(src, msg) => self.handle_task_accepted(src, msg, now),
            Envelope::TaskFinished(src, msg) => self.handle_task_finished(src, msg),
            Envelope::TaskAborted(src, msg) => self.handle_task_aborted(src, msg),
            Envelope::AvailabilityUpdate(src, msg) => self.handle_availability_update(src, msg, now),
            Envelope::Heartbeat(src, msg) => self.handle_heartbeat(src, msg, now),
            Envelope::DispatchCommand(msg) => self.handle_dispatch_command(msg, now),
            Envelope::RequestTimeout(_) => {
                warn!("RequestTimeout envelope arrived over transport; it is only ever synthesized locally from a fired timer");
            }
        }
    }

    fn handle_timer(&mut self, id: TimerId, now: Time) {
        let Some(armed) = self.timers.remove(&id) else {
            debug!(?id, "fired timer has no armed entry, already handled or cancelled");
            return;
        };
        match armed {
            Armed::TaskFinish => self.handle_task_finish_timer(now),
            Armed::RequestTimeout { request_id } => self.handle_request_timeout(request_id, now),
            Armed::PublishRetry => self.try_drain_pending_publish(now),
            Armed::HeartbeatSend => self.handle_heartbeat_send_timer(now),
            Armed::HeartbeatCheck => self.handle_heartbeat_check_timer(now),
        }
    }

    // ---- Dispatch / Local Scheduler (spec.md §4.1/§4.2) ----

    /// `handle` at whichever node this peer is. A `for_en` bag has reached
    /// its destination leaf; anything else is routed by the Dispatcher, or
    /// — if this peer is itself a leaf with no dispatcher above it, as
    /// happens when a submitter is colocated with its own executor — taken
    /// as this leaf's own destination.
    fn dispatch_bag(&mut self, src: Address, bag: TaskBagMsg, now: Time) {
        if bag.for_en {
            self.accept_at_leaf(src, bag, now);
            return;
        }

        if matches!(self.role, Role::Leaf(_)) {
            let mut direct = bag;
            direct.for_en = true;
            self.accept_at_leaf(src, direct, now);
            return;
        }

        let outgoing = match &mut self.role {
            Role::Dispatcher(dispatcher) => dispatcher.handle(&self.overlay, src, bag, now),
            Role::Leaf(_) => unreachable!("handled above"),
        };
        self.send_outgoing_bags(outgoing);
    }

    fn send_outgoing_bags(&mut self, outgoing: Vec<OutgoingBag>) {
        for out in outgoing {
            let Some(to) = self.resolve_destination(out.to) else {
                warn!(to = ?out.to, "no address for dispatch destination, dropping sub-bag");
                continue;
            };
            self.send_envelope(to, Envelope::TaskBag(self.own_addr, out.bag));
        }
    }

    fn resolve_destination(&self, to: Destination) -> Option<Address> {
        match to {
            Destination::Left => self.overlay.left_child(),
            Destination::Right => self.overlay.right_child(),
            Destination::Father => self.overlay.father(),
        }
    }

    fn child_addr(&self, side: Side) -> Option<Address> {
        match side {
            Side::Left => self.overlay.left_child(),
            Side::Right => self.overlay.right_child(),
        }
    }

    /// `accept` (spec.md §4.1): a `for_en` bag has reached its destination
    /// leaf. Resource rejection is logged and dropped — the dispatcher
    /// that routed it here is expected to have checked capacity already;
    /// this is only a safety net for a stale or racing decision.
    fn accept_at_leaf(&mut self, src: Address, bag: TaskBagMsg, now: Time) {
        let result = match &mut self.role {
            Role::Leaf(scheduler) => {
                let description = Arc::new(bag.req.clone());
                scheduler.accept(bag.requester, bag.request_id, bag.first_task, bag.last_task, description)
            }
            Role::Dispatcher(_) => {
                warn!("received a for_en TaskBag at a dispatcher node, dropping");
                return;
            }
        };

        match result {
            Ok(accepted) if accepted > 0 => {
                self.last_heartbeat.entry(bag.requester).or_insert(now);
                let msg = TaskAcceptedMsg {
                    request_id: bag.request_id,
                    first_local_task: bag.first_task,
                    last_local_task: bag.first_task + accepted - 1,
                    executor: self.own_addr,
                };
                self.send_envelope(bag.requester, Envelope::TaskAccepted(self.own_addr, msg));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "leaf rejected task bag"),
        }

        self.drive_scheduler(now);
        self.maybe_publish(now);
    }

    fn drive_scheduler(&mut self, now: Time) {
        let action = match &mut self.role {
            Role::Leaf(scheduler) => scheduler.tick(now),
            Role::Dispatcher(_) => None,
        };
        if let Some(TickAction::Started { finishes_at, .. }) = action {
            let id = self.transport.schedule_timer(finishes_at);
            self.timers.insert(id, Armed::TaskFinish);
        }
    }

    fn handle_task_finish_timer(&mut self, now: Time) {
        let finished = match &mut self.role {
            Role::Leaf(scheduler) => scheduler.complete_running(),
            Role::Dispatcher(_) => None,
        };
        if let Some(task) = finished {
            let msg = TaskFinishedMsg {
                request_id: task.request_id,
                local_task: task.task_index,
                executor: self.own_addr,
            };
            self.send_envelope(task.owner, Envelope::TaskFinished(self.own_addr, msg));
        }
        self.drive_scheduler(now);
        self.maybe_publish(now);
    }

    fn handle_heartbeat_send_timer(&mut self, now: Time) {
        let entries = match &self.role {
            Role::Leaf(scheduler) => scheduler.remaining_by_request(),
            Role::Dispatcher(_) => Vec::new(),
        };
        for (owner, request_id, remaining) in entries {
            // Executors never learn an application's instanceId directly —
            // only the requestId carried in the TaskBag — so the
            // submission manager on the receiving end translates this
            // back via `request_owner_instance`.
            let msg = HeartbeatMsg { instance_id: request_id, remaining };
            self.send_envelope(owner, Envelope::Heartbeat(self.own_addr, msg));
        }
        self.arm_heartbeat_send(now);
    }

    fn arm_heartbeat_send(&mut self, now: Time) {
        let deadline = now + Duration::from_micros(self.config.heartbeat.saturating_mul(1_000_000));
        let id = self.transport.schedule_timer(deadline);
        self.timers.insert(id, Armed::HeartbeatSend);
    }

    // ---- Submission Manager (spec.md §4.4) ----

    fn handle_task_accepted(&mut self, src: Address, msg: TaskAcceptedMsg, now: Time) {
        self.last_heartbeat.entry(src).or_insert(now);
        self.submission
            .accepted_tasks(src, msg.request_id, msg.first_local_task, msg.last_local_task, now);
    }

    fn handle_task_finished(&mut self, src: Address, msg: TaskFinishedMsg) {
        self.submission.finished_task(src, msg.request_id, msg.local_task);
    }

    fn handle_task_aborted(&mut self, src: Address, msg: TaskAbortedMsg) {
        self.submission.aborted_task(src, msg.request_id, msg.local_task);
    }

    fn handle_heartbeat(&mut self, src: Address, _msg: HeartbeatMsg, now: Time) {
        self.last_heartbeat.insert(src, now);
    }

    fn handle_heartbeat_check_timer(&mut self, now: Time) {
        let threshold = Duration::from_micros(self.config.heartbeat.saturating_mul(3).saturating_mul(1_000_000));
        let dead: Vec<Address> = self
            .last_heartbeat
            .iter()
            .filter(|(_, &last)| last.until(now) > threshold)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in dead {
            warn!(peer = %addr, "no heartbeat for 3x the configured interval, declaring dead");
            self.submission.dead_node(addr);
            self.last_heartbeat.remove(&addr);
        }
        self.arm_heartbeat_check(now);
    }

    fn arm_heartbeat_check(&mut self, now: Time) {
        let deadline = now + Duration::from_micros(self.config.heartbeat.saturating_mul(1_000_000));
        let id = self.transport.schedule_timer(deadline);
        self.timers.insert(id, Armed::HeartbeatCheck);
    }

    /// `DispatchCommand`: the submitter-local event releasing a new
    /// instance (spec.md §6).
    fn handle_dispatch_command(&mut self, msg: DispatchCommandMsg, now: Time) {
        match self.submission.create_instance(&msg.app_name, msg.deadline, now) {
            Ok(instance_id) => self.release_ready_tasks(instance_id, now),
            Err(e) => warn!(error = %e, app = %msg.app_name, "dispatch command failed"),
        }
    }

    fn release_ready_tasks(&mut self, instance_id: u64, now: Time) {
        let Some(request_id) = self.submission.build_request_from_ready(instance_id, now) else {
            return;
        };
        self.start_request(instance_id, request_id, now);
    }

    fn start_request(&mut self, instance_id: u64, request_id: u64, now: Time) {
        self.submission.start_search(request_id, now);
        self.broadcast_request(instance_id, request_id, now);
        self.arm_request_timeout(request_id, now);
    }

    fn broadcast_request(&mut self, instance_id: u64, request_id: u64, now: Time) {
        let (Some(len), Some(description)) = (
            self.submission.request_len(request_id),
            self.submission.instance_description(instance_id),
        ) else {
            return;
        };
        let bag = TaskBagMsg {
            request_id,
            requester: self.own_addr,
            first_task: 0,
            last_task: len - 1,
            req: (*description).clone(),
            for_en: false,
            from_en: true,
            estimated_slowness: None,
        };
        let own_addr = self.own_addr;
        self.dispatch_bag(own_addr, bag, now);
    }

    fn arm_request_timeout(&mut self, request_id: u64, now: Time) {
        let deadline = now + Duration::from_micros(self.config.request_timeout.saturating_mul(1_000_000));
        let id = self.transport.schedule_timer(deadline);
        self.timers.insert(id, Armed::RequestTimeout { request_id });
    }

    /// The retry policy's caller side (spec.md §4.4): rebroadcast the
    /// widened-deadline request, or surface job failure once exhausted.
    fn handle_request_timeout(&mut self, request_id: u64, now: Time) {
        match self.submission.on_search_timeout(request_id, now) {
            RetryOutcome::Retried { request_id: new_id, deadline, .. } => {
                let Some(instance_id) = self.submission.request_owner_instance(new_id) else { return };
                self.broadcast_request(instance_id, new_id, now);
                self.arm_request_timeout(new_id, now);
                debug!(new_id, %deadline, "request retried with a widened deadline");
            }
            RetryOutcome::NothingToRetry => {}
            RetryOutcome::Exhausted => warn!(request_id, "submission job failed: retries exhausted"),
        }
    }

    // ---- Availability propagation (spec.md §4.5) ----

    fn handle_availability_update(&mut self, src: Address, msg: AvailabilityUpdateMsg, now: Time) {
        let summary = match AvailabilitySummary::from_bytes(&msg.summary_bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, from = %src, "malformed availability update");
                return;
            }
        };

        if matches!(self.role, Role::Leaf(_)) {
            // A leaf only ever receives the derived-down view its father
            // sends; placement decisions all happen above it, so there is
            // nothing further to act on.
            debug!(from = %src, "leaf received a derived availability update");
            return;
        }

        let from_father = Some(src) == self.overlay.father();
        let from_left = Some(src) == self.overlay.left_child();
        let from_right = Some(src) == self.overlay.right_child();

        let down = match &mut self.role {
            Role::Dispatcher(dispatcher) => {
                if from_father {
                    dispatcher.on_father_summary(summary)
                } else if from_left {
                    dispatcher.on_child_summary(Side::Left, summary);
                    Vec::new()
                } else if from_right {
                    dispatcher.on_child_summary(Side::Right, summary);
                    Vec::new()
                } else {
                    warn!(from = %src, "availability update from an unrecognized peer");
                    Vec::new()
                }
            }
            Role::Leaf(_) => unreachable!("handled above"),
        };

        for (side, derived) in down {
            if let Some(addr) = self.child_addr(side) {
                self.publish_summary_to(addr, derived);
            }
        }
        self.maybe_publish(now);
    }

    /// Offer this node's current view upward, through the token bucket
    /// (spec.md §4.5). A Leaf projects its own state; a Dispatcher drains
    /// whatever `on_child_summary`/`on_father_summary` marked pending.
    fn maybe_publish(&mut self, now: Time) {
        let candidate = match &mut self.role {
            Role::Leaf(scheduler) => {
                let summary = scheduler.current_summary(now);
                let changed = self
                    .leaf_last_published
                    .as_ref()
                    .map(|old| !old.equal_within_threshold(&summary, EQUALITY_THRESHOLD))
                    .unwrap_or(true);
                if changed {
                    self.leaf_last_published = Some(summary.clone());
                    Some(summary)
                } else {
                    None
                }
            }
            Role::Dispatcher(dispatcher) => dispatcher.take_pending_publish(self.config.aggregation_clusters),
        };

        if let Some(summary) = candidate {
            self.offer_publish(summary, now);
        } else {
            self.try_drain_pending_publish(now);
        }
    }

    fn offer_publish(&mut self, summary: AvailabilitySummary, now: Time) {
        match self.propagation.offer(summary, now) {
            PublishDecision::SendNow(summary) => self.send_publish(summary),
            PublishDecision::Deferred { retry_at } => self.arm_publish_retry(retry_at),
        }
    }

    fn try_drain_pending_publish(&mut self, now: Time) {
        if !self.propagation.has_pending() {
            return;
        }
        match self.propagation.try_drain(now) {
            PublishDecision::SendNow(summary) => self.send_publish(summary),
            PublishDecision::Deferred { retry_at } => self.arm_publish_retry(retry_at),
        }
    }

    fn arm_publish_retry(&mut self, retry_at: Time) {
        let id = self.transport.schedule_timer(retry_at);
        self.timers.insert(id, Armed::PublishRetry);
    }

    fn send_publish(&mut self, summary: AvailabilitySummary) {
        let Some(to) = self.overlay.father() else { return };
        self.publish_summary_to(to, summary);
    }

    fn publish_summary_to(&mut self, to: Address, summary: AvailabilitySummary) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let msg = AvailabilityUpdateMsg {
            policy_tag: format!("{:?}", summary.policy()),
            summary_bytes: summary.to_bytes(),
            sequence,
        };
        self.send_envelope(to, Envelope::AvailabilityUpdate(self.own_addr, msg));
    }

    // ---- Transport ----

    fn send_envelope(&self, to: Address, env: Envelope) {
        if let Err(e) = self.transport.send(to, env) {
            warn!(error = %e, peer = %to, "send failed, dropping message");
        }
    }
}
