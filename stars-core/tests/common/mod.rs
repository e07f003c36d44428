// SPDX-License-Identifier: MIT

//! Shared test-only transport for `stars-core`'s own integration tests.
//!
//! `stars-core` deliberately ships no `Transport` that connects more than
//! one `Peer` (spec.md §1/§4.7) — `LoopbackTransport` always delivers into
//! its own queue regardless of `to`. The `sim-tools` crate solves this for
//! its manual simulators, but `tests/` can't depend on it without a cycle
//! (`sim-tools` itself depends on `stars-core`), so this module duplicates
//! the same small shape: one `mpsc` channel per address, a shared routing
//! table, and a background thread that turns due timers into `Event::Timer`
//! without ever touching scheduler state directly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use stars_core::address::Address;
use stars_core::config::{Config, Policy};
use stars_core::envelope::Envelope;
use stars_core::error::TransportError;
use stars_core::time::Time;
use stars_core::timer::{TimerId, TimerQueue};
use stars_core::transport::{Event, Transport};

/// A valid configuration with every interval shrunk to a couple of
/// seconds, so tests that need a real timer to fire don't have to wait
/// on production-scale durations.
pub fn test_config(policy: Policy) -> Config {
    Config {
        port: 9000,
        update_bw: 1_000_000,
        slowness_ratio: 1.5,
        mmp_beta: 0.9,
        heartbeat: 1,
        submit_retries: 2,
        avail_mem: 4_096,
        avail_disk: 8_192,
        policy,
        aggregation_clusters: 64,
        request_timeout: 1,
        deadline_multiplier: 2.0,
    }
}

const TIMER_POLL: StdDuration = StdDuration::from_millis(5);
const SHUTDOWN_POLL: StdDuration = StdDuration::from_millis(20);

pub fn addr(last: u8) -> Address {
    Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
}

pub fn now() -> Time {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Time::from_micros(since_epoch.as_micros() as u64)
}

pub struct Routes {
    senders: HashMap<Address, Sender<Event>>,
}

impl Routes {
    pub fn build(addrs: &[Address]) -> (Arc<Routes>, HashMap<Address, mpsc::Receiver<Event>>) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for &a in addrs {
            let (tx, rx) = mpsc::channel();
            senders.insert(a, tx);
            receivers.insert(a, rx);
        }
        (Arc::new(Routes { senders }), receivers)
    }

    pub fn sender(&self, addr: Address) -> Option<Sender<Event>> {
        self.senders.get(&addr).cloned()
    }
}

#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct TestTransport {
    routes: Arc<Routes>,
    inbox: Mutex<mpsc::Receiver<Event>>,
    timers: Arc<Mutex<TimerQueue<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl TestTransport {
    pub fn new(own_addr: Address, routes: Arc<Routes>, inbox: mpsc::Receiver<Event>) -> (Self, ShutdownHandle) {
        let timers = Arc::new(Mutex::new(TimerQueue::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let own_tx = routes.sender(own_addr).expect("own address missing from routing table");
        let timers_bg = timers.clone();
        let shutdown_bg = shutdown.clone();
        thread::spawn(move || loop {
            if shutdown_bg.load(Ordering::SeqCst) {
                return;
            }
            let due_ids = timers_bg.lock().unwrap().pop_due_ids(now());
            for id in due_ids {
                if own_tx.send(Event::Timer(id)).is_err() {
                    return;
                }
            }
            thread::sleep(TIMER_POLL);
        });

        (
            TestTransport {
                routes,
                inbox: Mutex::new(inbox),
                timers,
                shutdown: shutdown.clone(),
            },
            ShutdownHandle(shutdown),
        )
    }
}

impl Transport for TestTransport {
    fn send(&self, to: Address, env: Envelope) -> Result<(), TransportError> {
        match self.routes.sender(to) {
            Some(tx) => tx.send(Event::Message(env)).map_err(|_| TransportError::Unreachable(to)),
            None => Err(TransportError::Unreachable(to)),
        }
    }

    fn schedule_timer(&self, deadline: Time) -> TimerId {
        self.timers.lock().unwrap().schedule(deadline, ())
    }

    fn cancel_timer(&self, id: TimerId) {
        self.timers.lock().unwrap().cancel(id);
    }

    fn recv(&self) -> Option<Event> {
        let inbox = self.inbox.lock().unwrap();
        loop {
            match inbox.recv_timeout(SHUTDOWN_POLL) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}
