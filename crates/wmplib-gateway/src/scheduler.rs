//! Cooperative task scheduling for the gateway driver.
//!
//! The driver owns exactly one timer resource (a single `sleep_until` in
//! its select loop). [`Scheduler`] multiplexes all of the driver's timed
//! work over that one wake: each task is a key with an armed wake time,
//! the driver sleeps until the earliest one, then drains everything due
//! in ascending wake order and re-arms the sleep from the new minimum.
//!
//! Arming follows earliest-wins semantics: re-arming an already-armed
//! task with a later time is a no-op unless replacement is explicitly
//! requested. A generation counter increments whenever the next global
//! wake time changes, and a run-stamp recorded at arm time lets the
//! driver drop callbacks armed by a previous logical run of the device
//! after a restart or reconfiguration.
//!
//! Implemented as a binary heap with lazy invalidation: superseded heap
//! slots are discarded when they surface, by comparing against the
//! authoritative per-task entry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Authoritative state of one task.
#[derive(Debug)]
struct Entry {
    /// Armed wake time; `None` while suspended.
    wake: Option<Instant>,
    /// Sequence of the heap slot that currently represents this task.
    seq: u64,
    /// Run-stamp current when the task was last armed.
    stamp: u64,
}

/// A heap slot; ordered by wake time, then arm order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot<K> {
    wake: Instant,
    seq: u64,
    key: K,
}

impl<K: Eq> PartialOrd for Slot<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Eq> Ord for Slot<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.wake, self.seq).cmp(&(other.wake, other.seq))
    }
}

/// Keyed cooperative timer multiplexer.
///
/// `K` identifies a task; at most one task per key exists at a time.
#[derive(Debug)]
pub struct Scheduler<K> {
    entries: HashMap<K, Entry>,
    heap: BinaryHeap<Reverse<Slot<K>>>,
    next_seq: u64,
    generation: u64,
    run_stamp: u64,
    last_min: Option<Instant>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            generation: 0,
            run_stamp: 0,
            last_min: None,
        }
    }
}

impl<K: Clone + Eq + Hash + std::fmt::Debug> Scheduler<K> {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a task `delay` from now, earliest-wins.
    pub fn arm(&mut self, key: K, delay: Duration) {
        self.arm_at(key, Instant::now() + delay);
    }

    /// Arm a task at an absolute time, earliest-wins.
    ///
    /// If the task is already armed for an earlier (or equal) time this
    /// is a no-op; use [`arm_replace_at`](Self::arm_replace_at) to move a
    /// wake later.
    pub fn arm_at(&mut self, key: K, at: Instant) {
        let stamp = self.run_stamp;
        let entry = self.entries.entry(key.clone()).or_insert(Entry {
            wake: None,
            seq: 0,
            stamp,
        });
        entry.stamp = stamp;
        match entry.wake {
            Some(current) if current <= at => {}
            _ => {
                self.next_seq += 1;
                entry.wake = Some(at);
                entry.seq = self.next_seq;
                self.heap.push(Reverse(Slot {
                    wake: at,
                    seq: self.next_seq,
                    key,
                }));
            }
        }
        self.refresh_generation();
    }

    /// Arm a task `delay` from now, replacing any existing wake.
    pub fn arm_replace(&mut self, key: K, delay: Duration) {
        self.arm_replace_at(key, Instant::now() + delay);
    }

    /// Arm a task at an absolute time, replacing any existing wake.
    pub fn arm_replace_at(&mut self, key: K, at: Instant) {
        let stamp = self.run_stamp;
        self.next_seq += 1;
        let seq = self.next_seq;
        let entry = self.entries.entry(key.clone()).or_insert(Entry {
            wake: None,
            seq: 0,
            stamp,
        });
        entry.wake = Some(at);
        entry.seq = seq;
        entry.stamp = stamp;
        self.heap.push(Reverse(Slot { wake: at, seq, key }));
        self.refresh_generation();
    }

    /// Disarm a task without destroying it.
    pub fn suspend(&mut self, key: &K) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.wake = None;
        }
        self.refresh_generation();
    }

    /// Destroy a task.
    pub fn close(&mut self, key: &K) {
        self.entries.remove(key);
        self.refresh_generation();
    }

    /// Whether the task exists and is armed.
    pub fn is_armed(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| entry.wake.is_some())
    }

    /// The earliest armed wake time, if any task is pending.
    ///
    /// This is the single point the driver's one `sleep_until` is armed
    /// from.
    pub fn next_wake(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|Reverse(slot)| slot.wake)
    }

    /// Drain every task whose wake time has passed, in ascending wake
    /// order. Fired tasks are left suspended; their handlers re-arm them
    /// to continue.
    ///
    /// Tasks armed under an older run-stamp are stale: they are destroyed
    /// here, unrun.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        loop {
            self.prune();
            let fire = match self.heap.peek() {
                Some(Reverse(slot)) if slot.wake <= now => true,
                _ => false,
            };
            if !fire {
                break;
            }
            let Some(Reverse(slot)) = self.heap.pop() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&slot.key) else {
                continue;
            };
            if entry.stamp != self.run_stamp {
                tracing::debug!(task = ?slot.key, "dropping stale scheduled task");
                self.entries.remove(&slot.key);
                continue;
            }
            entry.wake = None;
            due.push(slot.key);
        }
        if !due.is_empty() {
            self.refresh_generation();
        }
        due
    }

    /// The generation counter; increments whenever the next global wake
    /// time changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The current run-stamp.
    pub fn run_stamp(&self) -> u64 {
        self.run_stamp
    }

    /// Start a new logical run; tasks armed before this are stale and
    /// will be dropped instead of fired.
    pub fn bump_run_stamp(&mut self) -> u64 {
        self.run_stamp += 1;
        self.run_stamp
    }

    /// Discard heap slots that no longer represent their task's armed
    /// state.
    fn prune(&mut self) {
        while let Some(Reverse(slot)) = self.heap.peek() {
            let valid = self
                .entries
                .get(&slot.key)
                .map_or(false, |entry| entry.wake == Some(slot.wake) && entry.seq == slot.seq);
            if valid {
                break;
            }
            self.heap.pop();
        }
    }

    fn refresh_generation(&mut self) {
        self.prune();
        let min = self.heap.peek().map(|Reverse(slot)| slot.wake);
        if min != self.last_min {
            self.generation += 1;
            self.last_min = min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Key {
        Tick,
        Receive,
        Sync,
    }

    #[test]
    fn earliest_wins_arming() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(10));
        let gen = sched.generation();

        // Later time: no-op, generation unchanged.
        sched.arm_at(Key::Tick, now + Duration::from_secs(60));
        assert_eq!(sched.next_wake(), Some(now + Duration::from_secs(10)));
        assert_eq!(sched.generation(), gen);

        // Earlier time: re-arms and bumps the generation.
        sched.arm_at(Key::Tick, now + Duration::from_secs(2));
        assert_eq!(sched.next_wake(), Some(now + Duration::from_secs(2)));
        assert!(sched.generation() > gen);
    }

    #[test]
    fn explicit_replace_moves_wake_later() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(5));
        sched.arm_replace_at(Key::Tick, now + Duration::from_secs(30));
        assert_eq!(sched.next_wake(), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn due_tasks_in_ascending_order() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Sync, now + Duration::from_secs(3));
        sched.arm_at(Key::Tick, now + Duration::from_secs(1));
        sched.arm_at(Key::Receive, now + Duration::from_secs(2));

        let due = sched.take_due(now + Duration::from_secs(10));
        assert_eq!(due, vec![Key::Tick, Key::Receive, Key::Sync]);

        // Fired tasks are left suspended, not destroyed.
        assert!(!sched.is_armed(&Key::Tick));
        assert_eq!(sched.next_wake(), None);
    }

    #[test]
    fn only_elapsed_tasks_fire() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(1));
        sched.arm_at(Key::Sync, now + Duration::from_secs(100));

        let due = sched.take_due(now + Duration::from_secs(2));
        assert_eq!(due, vec![Key::Tick]);
        assert_eq!(sched.next_wake(), Some(now + Duration::from_secs(100)));
    }

    #[test]
    fn suspend_disarms_without_destroying() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Receive, now + Duration::from_secs(1));
        sched.suspend(&Key::Receive);
        assert!(!sched.is_armed(&Key::Receive));
        assert!(sched.take_due(now + Duration::from_secs(5)).is_empty());

        // Re-arming a suspended task works.
        sched.arm_at(Key::Receive, now + Duration::from_secs(1));
        assert_eq!(
            sched.take_due(now + Duration::from_secs(5)),
            vec![Key::Receive]
        );
    }

    #[test]
    fn close_destroys() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(1));
        sched.close(&Key::Tick);
        assert!(sched.take_due(now + Duration::from_secs(5)).is_empty());
        assert_eq!(sched.next_wake(), None);
    }

    #[test]
    fn stale_run_stamp_tasks_dropped() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(1));
        sched.arm_at(Key::Receive, now + Duration::from_secs(1));

        sched.bump_run_stamp();
        // Receive is re-armed by the new run; Tick was armed by the old one.
        sched.arm_replace_at(Key::Receive, now + Duration::from_secs(1));

        let due = sched.take_due(now + Duration::from_secs(5));
        assert_eq!(due, vec![Key::Receive]);
    }

    #[test]
    fn suspend_of_earliest_bumps_generation() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.arm_at(Key::Tick, now + Duration::from_secs(1));
        sched.arm_at(Key::Sync, now + Duration::from_secs(10));
        let gen = sched.generation();

        // Suspending a non-minimum task leaves the next wake unchanged.
        sched.suspend(&Key::Sync);
        assert_eq!(sched.generation(), gen);

        sched.suspend(&Key::Tick);
        assert!(sched.generation() > gen);
        assert_eq!(sched.next_wake(), None);
    }
}
