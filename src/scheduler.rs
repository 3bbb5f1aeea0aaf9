// src/scheduler.rs
//! Deadline queue polled from the GUI frame loop.
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskToken(u64);

pub struct Scheduler<T> {
    queue: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, task: T) -> TaskToken {
        let id = self.next_id;
        self.next_id += 1;
        let due = now + delay;
        self.queue.insert((due, id), task);
        self.deadlines.insert(id, due);
        TaskToken(id)
    }

    /// Removes a task that has not fired yet.
    pub fn cancel(&mut self, token: TaskToken) -> Option<T> {
        let due = self.deadlines.remove(&token.0)?;
        self.queue.remove(&(due, token.0))
    }

    /// Earliest task due at `now`, in deadline then insertion order.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let (&(due, id), _) = self.queue.iter().next()?;
        if due > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.queue.remove(&(due, id))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        s.schedule(t0, Duration::from_millis(500), "b");
        s.schedule(t0, Duration::from_millis(100), "a");
        s.schedule(t0, Duration::from_millis(500), "c");
        assert_eq!(s.pop_due(t0), None);
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_millis(100)));
        let later = t0 + Duration::from_secs(1);
        assert_eq!(s.pop_due(later), Some("a"));
        assert_eq!(s.pop_due(later), Some("b"));
        assert_eq!(s.pop_due(later), Some("c"));
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn cancelled_task_never_fires() {
        let t0 = Instant::now();
        let mut s = Scheduler::new();
        let token = s.schedule(t0, Duration::ZERO, 1);
        s.schedule(t0, Duration::ZERO, 2);
        assert_eq!(s.cancel(token), Some(1));
        assert_eq!(s.cancel(token), None);
        assert_eq!(s.pop_due(t0), Some(2));
        assert_eq!(s.pop_due(t0), None);
    }
}
