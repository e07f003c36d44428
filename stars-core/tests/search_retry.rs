// SPDX-License-Identifier: MIT

//! Search-retry scenario (spec.md §8/§4.4): a request nobody ever accepts
//! is rebroadcast with a widened deadline once its search timer expires,
//! and gives up once `submit_retries` is exhausted. Driven only through
//! `Peer::register_app`/`run` and a raw observer channel standing in for
//! an unresponsive leaf — nothing here pokes at `SubmissionManager`
//! directly.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use stars_core::config::Policy;
use stars_core::envelope::{AvailabilityUpdateMsg, DispatchCommandMsg, Envelope};
use stars_core::overlay::StaticOverlay;
use stars_core::peer::Peer;
use stars_core::summary::ib::IbSummary;
use stars_core::summary::AvailabilitySummary;
use stars_core::task::TaskDescription;
use stars_core::time::{Duration, Time};
use stars_core::transport::Event;
use stars_core::zone::ZoneDescription;

use common::{addr, now, test_config, Routes};

#[test]
fn unanswered_request_is_retried_then_given_up() {
    let root = addr(1);
    let left = addr(2);
    let right = addr(3);

    let (routes, mut receivers) = Routes::build(&[root, left, right]);
    let root_rx = receivers.remove(&root).unwrap();
    // `left`/`right` are never backed by a running Peer — their channels
    // only let the test observe what the root sent them.
    let left_rx = receivers.remove(&left).unwrap();

    let (root_transport, root_shutdown) = common::TestTransport::new(root, routes.clone(), root_rx);

    let left_zone = ZoneDescription::singleton(left);
    let right_zone = ZoneDescription::singleton(right);
    let root_zone = left_zone.aggregate(&right_zone);
    let overlay = StaticOverlay::interior(None, (left, true), (right, true), left_zone, right_zone, root_zone);

    // submit_retries: 2, request_timeout: 1s (common::test_config).
    let mut root_peer = Peer::new_dispatcher(root, test_config(Policy::Ib), overlay, root_transport, 500);
    root_peer
        .register_app(
            "render",
            Arc::new(TaskDescription {
                min_memory_mb: 64,
                min_disk_mb: 32,
                num_tasks: 2,
                length: 1_000,
                input_bytes: 0,
                output_bytes: 0,
                deadline: Time::from_micros(0), // overwritten per-instance by DispatchCommand
            }),
        )
        .unwrap();

    let root_handle = thread::spawn(move || root_peer.run());

    let root_sender = routes.sender(root).unwrap();
    let left_summary = AvailabilitySummary::Ib(IbSummary::new(4_096, 8_192, 4.0));
    root_sender
        .send(Event::Message(Envelope::AvailabilityUpdate(
            left,
            AvailabilityUpdateMsg { policy_tag: "ib".into(), summary_bytes: left_summary.to_bytes(), sequence: 1 },
        )))
        .unwrap();

    let deadline = now() + Duration::from_micros(10_000_000);
    root_sender
        .send(Event::Message(Envelope::DispatchCommand(DispatchCommandMsg {
            app_name: "render".to_string(),
            deadline,
        })))
        .unwrap();

    // First broadcast, then two retries on a 1s timeout — `left` never
    // replies with TaskAccepted, so every one of them is the whole bag
    // under a fresh request id.
    let mut request_ids = Vec::new();
    for _ in 0..3 {
        match left_rx.recv_timeout(StdDuration::from_secs(3)) {
            Ok(Event::Message(Envelope::TaskBag(_, bag))) => request_ids.push(bag.request_id),
            other => panic!("expected a retried TaskBag, got {other:?}"),
        }
    }
    assert_eq!(request_ids.len(), 3);
    assert!(
        request_ids.iter().collect::<std::collections::HashSet<_>>().len() == 3,
        "each retry must carry a new request id: {request_ids:?}"
    );

    // Retries exhausted: no fourth bag shows up.
    assert!(
        left_rx.recv_timeout(StdDuration::from_millis(1_500)).is_err(),
        "no further retry should be sent once submit_retries is exhausted"
    );

    root_shutdown.signal();
    let _ = root_handle.join();
}
