// SPDX-License-Identifier: MIT

//! `ChannelTransport`: an `mpsc`-backed [`Transport`] that actually connects
//! several in-process `Peer`s — the piece `stars-core` leaves out on
//! purpose (spec.md §1/§4.7 put real networking out of scope).
//!
//! Every peer in a simulated tree shares one routing table of `Address ->
//! Sender<Event>`; `send` looks up the destination and forwards, `recv`
//! blocks on this peer's own receiver. Timers are fired by a background
//! thread that polls the `TimerQueue` and pushes `Event::Timer` back onto
//! the owning peer's own channel — it never touches scheduler state
//! directly, preserving the single-writer invariant spec.md §5 requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use stars_core::address::Address;
use stars_core::envelope::Envelope;
use stars_core::error::TransportError;
use stars_core::time::Time;
use stars_core::timer::{TimerId, TimerQueue};
use stars_core::transport::{Event, Transport};

const TIMER_POLL: StdDuration = StdDuration::from_millis(5);
const SHUTDOWN_POLL: StdDuration = StdDuration::from_millis(50);

fn now() -> Time {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Time::from_micros(since_epoch.as_micros() as u64)
}

/// Shared routing table: every peer's sender, keyed by its address.
pub struct Routes {
    senders: HashMap<Address, Sender<Event>>,
}

impl Routes {
    /// Allocate one channel per address in `addrs`, returning the shared
    /// routing table plus each address's own receiver, in the same order.
    pub fn build(addrs: &[Address]) -> (Arc<Routes>, Vec<mpsc::Receiver<Event>>) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for &addr in addrs {
            let (tx, rx) = mpsc::channel();
            senders.insert(addr, tx);
            receivers.push(rx);
        }
        (Arc::new(Routes { senders }), receivers)
    }

    /// A sender into `addr`'s own channel, for injecting local-only
    /// envelopes (e.g. a `DispatchCommand`) from outside the tree.
    pub fn sender(&self, addr: Address) -> Option<Sender<Event>> {
        self.senders.get(&addr).cloned()
    }
}

/// A handle that can stop a running `ChannelTransport`'s `recv` loop from
/// outside, independent of whoever now owns the transport itself.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ChannelTransport {
    routes: Arc<Routes>,
    inbox: Mutex<mpsc::Receiver<Event>>,
    timers: Arc<Mutex<TimerQueue<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Build the transport for `own_addr`, taking ownership of its
    /// receiver end from `Routes::build`, and start its timer-firing
    /// background thread.
    pub fn new(own_addr: Address, routes: Arc<Routes>, inbox: mpsc::Receiver<Event>) -> (Self, ShutdownHandle) {
        let timers = Arc::new(Mutex::new(TimerQueue::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let own_tx = routes
            .sender(own_addr)
            .expect("own address missing from routing table");
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
            ChannelTransport {
                routes,
                inbox: Mutex::new(inbox),
                timers,
                shutdown: shutdown.clone(),
            },
            ShutdownHandle(shutdown),
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, to: Address, env: Envelope) -> Result<(), TransportError> {
        match self.routes.sender(to) {
            Some(tx) => tx
                .send(Event::Message(env))
                .map_err(|_| TransportError::Unreachable(to)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use stars_core::envelope::RequestTimeoutMsg;

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    #[test]
    fn send_is_delivered_to_the_right_receiver() {
        let (routes, mut receivers) = Routes::build(&[addr(1), addr(2)]);
        let rx2 = receivers.remove(1);
        let rx1 = receivers.remove(0);
        let (t1, _h1) = ChannelTransport::new(addr(1), routes.clone(), rx1);
        let (t2, _h2) = ChannelTransport::new(addr(2), routes, rx2);

        let env = Envelope::RequestTimeout(RequestTimeoutMsg { request_id: 1 });
        t1.send(addr(2), env.clone()).unwrap();

        assert_eq!(t2.recv(), Some(Event::Message(env)));
    }

    #[test]
    fn send_to_unknown_address_is_unreachable() {
        let (routes, mut receivers) = Routes::build(&[addr(1)]);
        let rx1 = receivers.remove(0);
        let (t1, _h1) = ChannelTransport::new(addr(1), routes, rx1);
        let env = Envelope::RequestTimeout(RequestTimeoutMsg { request_id: 1 });
        let err = t1.send(addr(9), env).unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[test]
    fn shutdown_unblocks_recv() {
        let (routes, mut receivers) = Routes::build(&[addr(1)]);
        let rx1 = receivers.remove(0);
        let (t1, handle) = ChannelTransport::new(addr(1), routes, rx1);
        let t1 = Arc::new(t1);
        let t2 = t1.clone();
        let joined = thread::spawn(move || t2.recv());
        thread::sleep(StdDuration::from_millis(20));
        handle.signal();
        assert_eq!(joined.join().unwrap(), None);
    }

    #[test]
    fn scheduled_timer_fires_as_an_event() {
        let (routes, mut receivers) = Routes::build(&[addr(1)]);
        let rx1 = receivers.remove(0);
        let (t1, _handle) = ChannelTransport::new(addr(1), routes, rx1);
        let id = t1.schedule_timer(now());
        assert_eq!(t1.recv(), Some(Event::Timer(id)));
    }
}
