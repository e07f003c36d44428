//! The peer's timer queue: a min-heap of `(deadline, event)` with
//! id-based cancellation, per spec.md §9's design note.
//!
//! Expired entries are popped by [`TimerQueue::pop_due`]; cancelled entries
//! are skipped lazily at pop time rather than removed from the heap
//! eagerly, exactly as the design note specifies.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::time::Time;

/// Handle returned by [`TimerQueue::schedule`], used to cancel later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug)]
struct Entry<E> {
    deadline: Time,
    id: TimerId,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts
        // to the top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A min-heap of pending timer events, keyed by absolute deadline.
pub struct TimerQueue<E> {
    heap: BinaryHeap<Entry<E>>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` to fire at `deadline`; returns an id that can be
    /// passed to [`TimerQueue::cancel`].
    pub fn schedule(&mut self, deadline: Time, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Entry {
            deadline,
            id,
            event,
        });
        id
    }

    /// Mark `id` cancelled. The entry is skipped lazily next time it would
    /// be popped; this is `O(1)` rather than a heap scan.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Like [`TimerQueue::pop_due`] but returns the fired entries' ids
    /// rather than their payloads — useful when `E` is a unit type and the
    /// id itself is what the caller needs to report.
    pub fn pop_due_ids(&mut self, now: Time) -> Vec<TimerId> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            fired.push(entry.id);
        }
        fired
    }

    /// Pop and return every event whose deadline is `<= now`, skipping any
    /// cancelled entries encountered along the way, earliest first.
    pub fn pop_due(&mut self, now: Time) -> Vec<E> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            fired.push(entry.event);
        }
        fired
    }

    /// The deadline of the next non-cancelled event, if any — used by the
    /// event loop to size its wait.
    pub fn next_deadline(&mut self) -> Option<Time> {
        while let Some(top) = self.heap.peek() {
            if self.cancelled.contains(&top.id) {
                let entry = self.heap.pop().unwrap();
                self.cancelled.remove(&entry.id);
                continue;
            }
            return Some(top.deadline);
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.heap.len() == self.cancelled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_due_returns_events_in_deadline_order() {
        let mut q = TimerQueue::new();
        q.schedule(Time::from_micros(300), "c");
        q.schedule(Time::from_micros(100), "a");
        q.schedule(Time::from_micros(200), "b");

        let fired = q.pop_due(Time::from_micros(250));
        assert_eq!(fired, vec!["a", "b"]);
    }

    #[test]
    fn cancelled_entries_are_skipped() {
        let mut q = TimerQueue::new();
        let id_a = q.schedule(Time::from_micros(100), "a");
        q.schedule(Time::from_micros(200), "b");
        q.cancel(id_a);

        let fired = q.pop_due(Time::from_micros(300));
        assert_eq!(fired, vec!["b"]);
    }

    #[test]
    fn next_deadline_skips_cancelled_entries() {
        let mut q = TimerQueue::new();
        let id_a = q.schedule(Time::from_micros(100), "a");
        q.schedule(Time::from_micros(200), "b");
        q.cancel(id_a);
        assert_eq!(q.next_deadline(), Some(Time::from_micros(200)));
    }

    #[test]
    fn is_empty_accounts_for_cancelled_entries() {
        let mut q: TimerQueue<&str> = TimerQueue::new();
        assert!(q.is_empty());
        let id = q.schedule(Time::from_micros(100), "a");
        assert!(!q.is_empty());
        q.cancel(id);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_due_nothing_ready_returns_empty() {
        let mut q = TimerQueue::new();
        q.schedule(Time::from_micros(500), "a");
        assert!(q.pop_due(Time::from_micros(100)).is_empty());
    }
}
