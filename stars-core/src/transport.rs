//! Transport contract (spec.md §4.7): the send/recv/timer interface the
//! Dispatcher, Local Scheduler and Submission Manager use. The crate never
//! opens a socket itself — only [`LoopbackTransport`] ships here, for unit
//! tests; `sim-tools::ChannelTransport` wires several peers together for
//! integration-style exercising, and a production deployment supplies its
//! own network-backed implementation.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::address::Address;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::time::{Duration, Time};
use crate::timer::{TimerId, TimerQueue};

/// What the event loop pulls from its queue: a message that arrived, or a
/// timer that fired.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(Envelope),
    Timer(TimerId),
}

/// Send/receive/timer contract a peer's components are built against.
/// Matches spec.md §1's "only its send/recv/timer contract is used".
pub trait Transport {
    /// Hand `env` off for delivery to `to`. Returns immediately — delivery
    /// (or failure) surfaces later as an [`Event::Message`] on the
    /// recipient's own queue, or is silently dropped on an unreachable
    /// peer (spec.md §7 kind 1).
    fn send(&self, to: Address, env: Envelope) -> Result<(), TransportError>;

    /// Schedule a timer to fire at `deadline`; it surfaces as
    /// `Event::Timer(id)` on this peer's own queue.
    fn schedule_timer(&self, deadline: Time) -> TimerId;

    fn cancel_timer(&self, id: TimerId);

    /// Block until at least one event is available, or `None` on shutdown.
    fn recv(&self) -> Option<Event>;
}

/// Delivers every `send` straight into its own queue — used by unit tests
/// that exercise one peer's handlers without any real addressing.
pub struct LoopbackTransport {
    queue: Arc<(Mutex<VecDeque<Event>>, Condvar)>,
    timers: Arc<Mutex<TimerQueue<()>>>,
    shutdown: Arc<Mutex<bool>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            queue: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            timers: Arc::new(Mutex::new(TimerQueue::new())),
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    /// Push an event directly, bypassing `send` — used by tests to seed a
    /// peer's queue.
    pub fn push(&self, event: Event) {
        let (lock, cvar) = &*self.queue;
        let mut q = lock.lock().unwrap();
        q.push_back(event);
        cvar.notify_one();
    }

    /// Drain every timer whose deadline has passed and enqueue it as an
    /// event — the event loop's timer thread calls this, it never mutates
    /// scheduler state directly (spec.md §5).
    pub fn fire_due_timers(&self, now: Time) {
        let due = self.timers.lock().unwrap().pop_due_ids(now);
        for id in due {
            self.push(Event::Timer(id));
        }
    }

    pub fn shutdown(&self) {
        *self.shutdown.lock().unwrap() = true;
        self.queue.1.notify_all();
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, _to: Address, env: Envelope) -> Result<(), TransportError> {
        self.push(Event::Message(env));
        Ok(())
    }

    fn schedule_timer(&self, deadline: Time) -> TimerId {
        let mut timers = self.timers.lock().unwrap();
        timers.schedule(deadline, ())
    }

    fn cancel_timer(&self, id: TimerId) {
        self.timers.lock().unwrap().cancel(id);
    }

    fn recv(&self) -> Option<Event> {
        let (lock, cvar) = &*self.queue;
        let mut q = lock.lock().unwrap();
        loop {
            if let Some(event) = q.pop_front() {
                return Some(event);
            }
            if *self.shutdown.lock().unwrap() {
                return None;
            }
            q = cvar.wait(q).unwrap();
        }
    }
}

/// Shorthand used by tests and the peer loop for "now + N seconds".
pub fn deadline_in(now: Time, secs: u64) -> Time {
    now + Duration::from_micros(secs * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    #[test]
    fn send_delivers_into_own_queue() {
        let t = LoopbackTransport::new();
        let env = Envelope::RequestTimeout(crate::envelope::RequestTimeoutMsg { request_id: 1 });
        t.send(addr(1), env.clone()).unwrap();
        assert_eq!(t.recv(), Some(Event::Message(env)));
    }

    #[test]
    fn shutdown_unblocks_recv() {
        let t = Arc::new(LoopbackTransport::new());
        let t2 = t.clone();
        let handle = std::thread::spawn(move || t2.recv());
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.shutdown();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn due_timer_surfaces_as_an_event() {
        let t = LoopbackTransport::new();
        let id = t.schedule_timer(Time::from_micros(100));
        t.fire_due_timers(Time::from_micros(50));
        t.fire_due_timers(Time::from_micros(100));
        assert_eq!(t.recv(), Some(Event::Timer(id)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let t = LoopbackTransport::new();
        let id = t.schedule_timer(Time::from_micros(100));
        t.cancel_timer(id);
        t.fire_due_timers(Time::from_micros(200));
        t.shutdown();
        assert_eq!(t.recv(), None);
    }
}
