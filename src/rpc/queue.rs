//! Bounded queues and the worker wakeup signal.
//!
//! Two independent queues connect the façade to the connection engine: the
//! façade pushes commands into the outbound queue and the worker drains them;
//! the worker pushes messages into the inbound queue and the caller (or the
//! worker itself, in auto-events mode) drains those.
//!
//! Overflow policy is drop-oldest: memory stays bounded at `capacity` items
//! regardless of producer volume, and the newest item always gets in. Every
//! eviction logs one line.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Default outbound (command) queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 512;

/// Default inbound (message) queue capacity. `0` disables buffering entirely;
/// messages are then only delivered through the event handler.
pub const DEFAULT_INBOUND_CAPACITY: usize = 128;

/// Mutex-guarded FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    label: &'static str,
}

impl<T: Clone> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize, label: &'static str) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            label,
        }
    }

    /// Append an item, evicting the oldest one if the queue is full.
    ///
    /// Returns `false` when an eviction happened. With `capacity == 0` the
    /// item is discarded outright and `false` is returned.
    pub fn push(&self, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let mut queue = self.inner.lock().expect("queue lock poisoned");
        let mut clean = true;
        while queue.len() >= self.capacity {
            queue.pop_front();
            log::warn!(
                "{} queue full ({} items), dropping oldest entry",
                self.label,
                self.capacity
            );
            clean = false;
        }
        queue.push_back(item);
        clean
    }

    /// Remove and return the oldest item.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().expect("queue lock poisoned").pop_front()
    }

    /// Clone of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .front()
            .cloned()
    }

    /// Atomically drain the queue and return the snapshot in FIFO order.
    pub fn dequeue_all(&self) -> Vec<T> {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        queue.drain(..).collect()
    }

    /// Atomically replace the whole queue contents.
    ///
    /// Used by the shutdown sequence, which must clear pending user commands
    /// and install the farewell pair in one step.
    pub fn replace(&self, items: Vec<T>) {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        queue.clear();
        queue.extend(items);
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Auto-reset wakeup event for the worker.
///
/// `notify` latches the signal; `wait_timeout` consumes it, returning
/// immediately if it was already latched, otherwise blocking until it is
/// latched or the timeout passes. One `notify` wakes one `wait_timeout`.
#[derive(Debug, Default)]
pub struct QueueSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl QueueSignal {
    /// Create an unlatched signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal and wake a waiter.
    pub fn notify(&self) {
        let mut flag = self.flag.lock().expect("signal lock poisoned");
        *flag = true;
        self.condvar.notify_one();
    }

    /// Wait until the signal is latched or `timeout` passes.
    ///
    /// Returns `true` when woken by a latch, `false` on timeout. The latch is
    /// consumed either way it was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock().expect("signal lock poisoned");
        if !*flag {
            let (guard, _) = self
                .condvar
                .wait_timeout_while(flag, timeout, |latched| !*latched)
                .expect("signal lock poisoned");
            flag = guard;
        }
        let latched = *flag;
        *flag = false;
        latched
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order_preserved() {
        let queue = BoundedQueue::new(8, "test");
        for i in 0..5 {
            assert!(queue.push(i));
        }
        assert_eq!(queue.dequeue_all(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_keeps_fifo() {
        let queue = BoundedQueue::new(3, "test");
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert!(!queue.push(4)); // evicts 1
        assert!(!queue.push(5)); // evicts 2
        assert_eq!(queue.dequeue_all(), vec![3, 4, 5]);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let queue = BoundedQueue::new(10, "test");
        for i in 0..100 {
            queue.push(i);
            assert!(queue.len() <= 10);
        }
        // 600 pushes into 512 drops exactly the first 88.
        let big = BoundedQueue::new(512, "test");
        for i in 0..600 {
            big.push(i);
        }
        let drained = big.dequeue_all();
        assert_eq!(drained.len(), 512);
        assert_eq!(drained[0], 88);
        assert_eq!(drained[511], 599);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = BoundedQueue::new(4, "test");
        queue.push("a");
        assert_eq!(queue.peek(), Some("a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn replace_swaps_contents_atomically() {
        let queue = BoundedQueue::new(8, "test");
        queue.push(1);
        queue.push(2);
        queue.replace(vec![10, 11]);
        assert_eq!(queue.dequeue_all(), vec![10, 11]);
    }

    #[test]
    fn zero_capacity_never_buffers() {
        let queue = BoundedQueue::new(0, "test");
        assert!(!queue.push(1));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn signal_wakes_waiter() {
        let signal = Arc::new(QueueSignal::new());
        let waiter = Arc::clone(&signal);

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn signal_times_out_when_idle() {
        let signal = QueueSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn signal_is_auto_reset() {
        let signal = QueueSignal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        // Latch was consumed; second wait must time out.
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn notify_before_wait_is_not_lost() {
        let signal = QueueSignal::new();
        signal.notify();
        // Latched well before the wait starts.
        assert!(signal.wait_timeout(Duration::from_secs(1)));
    }
}
