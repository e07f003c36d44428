//! Availability propagation: the per-node token bucket that throttles
//! upward summary publishes to `update_bw` bytes/second (spec.md §4.5).
//!
//! A component (the Dispatcher, or the Local Scheduler at a leaf) asks
//! [`PropagationGate::offer`] whether a proposed summary can go out now.
//! The gate debits the bucket and says yes immediately if it affords the
//! serialized size; otherwise it holds the summary and reports when it
//! will next be affordable, mirroring the original's token-bucket shaper
//! (`include/SubmissionNode.hpp`'s update throttling) rather than a fixed
//! polling interval.

use crate::summary::AvailabilitySummary;
use crate::time::{Duration, Time};

/// Outcome of [`PropagationGate::offer`].
#[derive(Debug, Clone, PartialEq)]
pub enum PublishDecision {
    /// The bucket affords it now; the caller sends `summary` immediately.
    SendNow(AvailabilitySummary),
    /// Not enough budget yet; retry no earlier than `retry_at`. The gate
    /// remembers the pending summary and coalesces repeated `offer` calls
    /// for the same logical publish until it succeeds.
    Deferred { retry_at: Time },
}

/// A token bucket of `capacity_bytes`, refilling at `rate_bytes_per_sec`,
/// gating one node's upward publishes.
pub struct PropagationGate {
    rate_bytes_per_sec: u64,
    capacity_bytes: f64,
    tokens: f64,
    last_refill: Time,
    pending: Option<AvailabilitySummary>,
}

impl PropagationGate {
    /// `rate_bytes_per_sec` is spec.md §6's `update_bw`; the bucket starts
    /// full so the very first publish after startup isn't throttled.
    pub fn new(rate_bytes_per_sec: u64, now: Time) -> Self {
        PropagationGate {
            rate_bytes_per_sec,
            capacity_bytes: rate_bytes_per_sec as f64,
            tokens: rate_bytes_per_sec as f64,
            last_refill: now,
            pending: None,
        }
    }

    fn refill(&mut self, now: Time) {
        let elapsed_secs = self.last_refill.until(now).as_micros() as f64 / 1_000_000.0;
        self.tokens = (self.tokens + elapsed_secs * self.rate_bytes_per_sec as f64).min(self.capacity_bytes);
        self.last_refill = now;
    }

    /// Offer `summary` for upward publish at `now`. Replaces any
    /// already-pending summary with this newer one — propagation only ever
    /// cares about the latest view, never a backlog of stale ones.
    pub fn offer(&mut self, summary: AvailabilitySummary, now: Time) -> PublishDecision {
        self.pending = Some(summary);
        self.try_drain(now)
    }

    /// Retry whatever is pending, without offering a new summary — the
    /// event loop calls this when a previously scheduled retry timer fires.
    pub fn try_drain(&mut self, now: Time) -> PublishDecision {
        self.refill(now);
        let Some(summary) = self.pending.take() else {
            return PublishDecision::Deferred { retry_at: now };
        };

        let cost = summary.wire_size_bytes() as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            PublishDecision::SendNow(summary)
        } else {
            let shortfall = cost - self.tokens;
            let wait_secs = if self.rate_bytes_per_sec == 0 {
                f64::INFINITY
            } else {
                shortfall / self.rate_bytes_per_sec as f64
            };
            let retry_at = now + Duration::from_micros((wait_secs * 1_000_000.0) as u64);
            self.pending = Some(summary);
            PublishDecision::Deferred { retry_at }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
