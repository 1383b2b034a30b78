//! Deadline-ordered task queue.
//!
//! Tasks live inside their heap entries. Entries are keyed by
//! `(deadline, sequence)`, so tasks sharing a deadline run in the order they
//! were pushed.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

use super::Task;
use super::clock::Time;

struct Timer {
    deadline: Time,
    seq: u64,
    task: Task,
}

impl Timer {
    fn key(&self) -> Reverse<(Time, u64)> {
        Reverse((self.deadline, self.seq))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Tasks waiting for their deadline, earliest first.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Timer>,
    pushed: u64,
}

impl TimerQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queues `task` to run at `deadline` and returns its sequence number.
    pub fn push(&mut self, deadline: Time, task: Task) -> u64 {
        let seq = self.pushed;
        self.pushed += 1;
        self.heap.push(Timer {
            deadline,
            seq,
            task,
        });
        seq
    }

    /// Returns the earliest deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|timer| timer.deadline)
    }

    /// Removes and returns the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: Time) -> Option<Task> {
        if self.next_deadline()? > now {
            return None;
        }
        self.heap.pop().map(|timer| timer.task)
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.heap.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn push_logged(queue: &mut TimerQueue, log: &Rc<RefCell<Vec<u32>>>, ms: u64, n: u32) {
        let log = Rc::clone(log);
        queue.push(Time::from_millis(ms), Box::new(move || log.borrow_mut().push(n)));
    }

    #[test]
    fn empty_queue_has_nothing_due() {
        let mut queue = TimerQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
        assert!(queue.pop_due(Time::from_millis(u64::MAX)).is_none());
    }

    #[test]
    fn pops_due_tasks_by_deadline_then_push_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = TimerQueue::new();
        push_logged(&mut queue, &log, 100, 1);
        push_logged(&mut queue, &log, 200, 2);
        push_logged(&mut queue, &log, 50, 3);
        push_logged(&mut queue, &log, 100, 4);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.next_deadline(), Some(Time::from_millis(50)));

        while let Some(task) = queue.pop_due(Time::from_millis(125)) {
            task();
        }
        assert_eq!(*log.borrow(), vec![3, 1, 4]);
        assert_eq!(queue.next_deadline(), Some(Time::from_millis(200)));
    }

    #[test]
    fn sequence_numbers_count_pushes() {
        let mut queue = TimerQueue::new();
        assert_eq!(queue.push(Time::from_millis(5), Box::new(|| {})), 0);
        assert_eq!(queue.push(Time::from_millis(1), Box::new(|| {})), 1);
        assert!(queue.pop_due(Time::from_millis(0)).is_none());
    }
}
