//! Single-Threaded Task Queue
//!
//! Delayed tasks keyed by due time. A named slot holds at most one pending
//! task: scheduling into an occupied slot cancels the old task first, which
//! is how preview updates are debounced.

use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug)]
struct Scheduled<T> {
    handle: TaskHandle,
    due: Duration,
    slot: Option<String>,
    task: T,
}

#[derive(Debug)]
pub struct TaskQueue<T> {
    pending: Vec<Scheduled<T>>,
    next_id: u64,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self { pending: Vec::new(), next_id: 0 }
    }

    fn push(&mut self, due: Duration, slot: Option<String>, task: T) -> TaskHandle {
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        self.pending.push(Scheduled { handle, due, slot, task });
        handle
    }

    pub fn schedule(&mut self, now: Duration, delay: Duration, task: T) -> TaskHandle {
        self.push(now + delay, None, task)
    }

    /// Cancel-and-reschedule on a named slot.
    pub fn debounce(&mut self, slot: &str, now: Duration, delay: Duration, task: T) -> TaskHandle {
        if self.cancel_slot(slot) {
            debug!(slot, "Coalesced pending task");
        }
        self.push(now + delay, Some(slot.to_string()), task)
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|s| s.handle != handle);
        self.pending.len() != before
    }

    pub fn cancel_slot(&mut self, slot: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|s| s.slot.as_deref() != Some(slot));
        self.pending.len() != before
    }

    pub fn is_slot_pending(&self, slot: &str) -> bool {
        self.pending.iter().any(|s| s.slot.as_deref() == Some(slot))
    }

    /// Removes and returns every task due at or before `now`, oldest first.
    /// Ties run in scheduling order.
    pub fn take_due(&mut self, now: Duration) -> Vec<T> {
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|s| s.due <= now);
        self.pending = waiting;

        due.sort_by(|a, b| a.due.cmp(&b.due).then(a.handle.0.cmp(&b.handle.0)));
        due.into_iter().map(|s| s.task).collect()
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.pending.iter().map(|s| s.due).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_due_tasks_in_order() {
        let mut queue = TaskQueue::new();
        queue.schedule(ms(0), ms(300), "late");
        queue.schedule(ms(0), ms(100), "early");
        queue.schedule(ms(0), ms(100), "early-second");

        assert!(queue.take_due(ms(50)).is_empty());
        assert_eq!(queue.take_due(ms(100)), vec!["early", "early-second"]);
        assert_eq!(queue.next_due(), Some(ms(300)));
        assert_eq!(queue.take_due(ms(1000)), vec!["late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_debounce_keeps_latest_only() {
        let mut queue = TaskQueue::new();
        queue.debounce("preview", ms(0), ms(200), 1);
        queue.debounce("preview", ms(150), ms(200), 2);
        queue.debounce("preview", ms(300), ms(200), 3);

        assert_eq!(queue.len(), 1);
        assert!(queue.take_due(ms(450)).is_empty());
        assert_eq!(queue.take_due(ms(500)), vec![3]);
    }

    #[test]
    fn test_slots_are_independent() {
        let mut queue = TaskQueue::new();
        queue.debounce("a", ms(0), ms(200), "a1");
        queue.debounce("b", ms(0), ms(200), "b1");
        queue.debounce("a", ms(100), ms(200), "a2");

        assert_eq!(queue.take_due(ms(200)), vec!["b1"]);
        assert!(queue.is_slot_pending("a"));
        assert_eq!(queue.take_due(ms(300)), vec!["a2"]);
    }

    #[test]
    fn test_cancel_by_handle() {
        let mut queue = TaskQueue::new();
        let handle = queue.schedule(ms(0), ms(10), "x");
        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        assert!(queue.take_due(ms(100)).is_empty());
    }
}
