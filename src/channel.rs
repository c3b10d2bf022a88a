use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Condvar, Mutex, MutexGuard};

const MIN_CAPACITY: usize = 1;
const MAX_CAPACITY: usize = 256;

/// Bounded blocking FIFO between the producer thread and the consumer.
///
/// `push` blocks while full, `pop` blocks while empty; [`Self::cancel`] is
/// sticky, wakes every waiter, and makes both operations bail out
/// immediately, dropping anything still queued. The capacity doubles as
/// backpressure: the producer can never run more than `capacity` batches
/// ahead of the consumer.
pub struct BoundedChannel<T> {
    queue: Mutex<VecDeque<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    cancelled: AtomicBool,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// `capacity` is clamped to [1, 256].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);

        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            cancelled: AtomicBool::new(false),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A poisoned queue only means another thread died mid-push/pop; the
        // deque itself is still structurally sound.
        self.queue.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, VecDeque<T>>,
        condvar: &Condvar,
    ) -> MutexGuard<'a, VecDeque<T>> {
        condvar
            .wait(guard)
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Blocks until a slot frees up. Returns `false` if the channel was
    /// cancelled, in which case `item` is dropped.
    pub fn push(&self, item: T) -> bool {
        let mut queue = self.lock();

        while !self.cancelled.load(Relaxed) && queue.len() >= self.capacity {
            queue = self.wait(queue, &self.not_full);
        }

        if self.cancelled.load(Relaxed) {
            return false;
        }

        queue.push_back(item);
        drop(queue);

        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available. Returns `None` once cancelled.
    pub fn pop(&self) -> Option<T> {
        let mut queue = self.lock();

        while !self.cancelled.load(Relaxed) && queue.is_empty() {
            queue = self.wait(queue, &self.not_empty);
        }

        if self.cancelled.load(Relaxed) {
            return None;
        }

        let item = queue.pop_front();
        drop(queue);

        self.not_full.notify_one();
        item
    }

    /// Sticky: wakes all waiters and makes every later push/pop bail out.
    pub fn cancel(&self) {
        // Flip the flag under the lock so a waiter between its predicate
        // check and sleep cannot miss the wakeup.
        let guard = self.lock();
        self.cancelled.store(true, Relaxed);
        drop(guard);

        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
