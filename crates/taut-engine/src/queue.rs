use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound on queued commands at any instant.
pub const MAX_PENDING_TASKS: usize = 4096;

/// How long the engine parks when there is no work.
pub const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Bounded FIFO between RPC producer threads and the engine thread.
///
/// Producers block in [`CommandQueue::push`] while the queue is at
/// capacity; items are never dropped. The engine drains with a
/// swap-then-execute pattern so producers can keep enqueueing while a batch
/// executes. Wake-ups are collapsed: any number of concurrent pushes or
/// [`CommandQueue::notify`] calls cost one wake.
#[derive(Debug)]
pub struct CommandQueue<T> {
    inner: Mutex<Inner<T>>,
    work_available: Condvar,
    space_available: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    poked: bool,
    closed: bool,
}

impl<T> CommandQueue<T> {
    /// A queue admitting at most `capacity` items at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                poked: false,
                closed: false,
            }),
            work_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the item back when the queue has been closed; nothing is
    /// ever silently dropped.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.lock();
        while inner.items.len() >= self.capacity && !inner.closed {
            inner = self
                .space_available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.work_available.notify_one();
        Ok(())
    }

    /// Append without honoring the capacity bound. Reserved for the engine
    /// thread's warm-up phase, where blocking would deadlock the loop that
    /// is supposed to drain the queue.
    pub(crate) fn push_unbounded(&self, item: T) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.items.push_back(item);
        drop(inner);
        self.work_available.notify_one();
    }

    /// Swap the pending batch out and signal waiting producers.
    #[must_use]
    pub fn drain(&self) -> VecDeque<T> {
        let mut inner = self.lock();
        let batch = std::mem::take(&mut inner.items);
        drop(inner);
        if !batch.is_empty() {
            self.space_available.notify_all();
        }
        batch
    }

    /// Wake the engine loop without enqueueing work (used by timers).
    pub fn notify(&self) {
        let mut inner = self.lock();
        inner.poked = true;
        drop(inner);
        self.work_available.notify_one();
    }

    /// Park until work arrives, `idle` elapses, or shutdown is requested.
    /// Returns `true` when there is work to drain.
    pub fn wait_for_work(&self, idle: Duration, shutdown: &AtomicBool) -> bool {
        let inner = self.lock();
        let (mut inner, _timeout) = self
            .work_available
            .wait_timeout_while(inner, idle, |inner| {
                inner.items.is_empty()
                    && !inner.poked
                    && !inner.closed
                    && !shutdown.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.poked = false;
        !inner.items.is_empty()
    }

    /// Refuse further pushes and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.work_available.notify_all();
        self.space_available.notify_all();
    }

    /// Whether [`CommandQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order_is_preserved_across_drains() {
        let queue = CommandQueue::new(8);
        for value in 0..5 {
            queue.push(value).unwrap();
        }
        let batch: Vec<i32> = queue.drain().into_iter().collect();
        assert_eq!(batch, vec![0, 1, 2, 3, 4]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn push_blocks_at_capacity_until_drained() {
        let queue = Arc::new(CommandQueue::new(2));
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let started = Instant::now();
                queue.push(3).unwrap();
                started.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 2, "producer must still be blocked");
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);

        let blocked_for = producer.join().unwrap();
        assert!(
            blocked_for >= Duration::from_millis(40),
            "producer should have waited, waited {blocked_for:?}"
        );
        assert_eq!(queue.drain().into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn queue_depth_never_exceeds_capacity_under_flood() {
        const CAPACITY: usize = 16;
        const ITEMS: usize = 400;
        let queue = Arc::new(CommandQueue::new(CAPACITY));
        let executed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for value in 0..ITEMS {
                    queue.push(value).unwrap();
                }
            })
        };

        let mut max_depth = 0;
        while executed.load(Ordering::Relaxed) < ITEMS {
            max_depth = max_depth.max(queue.len());
            for _ in queue.drain() {
                executed.fetch_add(1, Ordering::Relaxed);
            }
            thread::yield_now();
        }
        producer.join().unwrap();

        assert_eq!(executed.load(Ordering::Relaxed), ITEMS);
        assert!(
            max_depth <= CAPACITY,
            "observed depth {max_depth} beyond capacity {CAPACITY}"
        );
    }

    #[test]
    fn close_rejects_pushes_and_unblocks_producers() {
        let queue = Arc::new(CommandQueue::new(1));
        queue.push(1).unwrap();

        let blocked = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(blocked.join().unwrap(), Err(2));
        assert_eq!(queue.push(3), Err(3));
        // Items queued before close still drain.
        assert_eq!(queue.drain().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn wait_for_work_honors_idle_timeout_and_notify() {
        let queue: CommandQueue<i32> = CommandQueue::new(4);
        let shutdown = AtomicBool::new(false);

        let started = Instant::now();
        assert!(!queue.wait_for_work(Duration::from_millis(30), &shutdown));
        assert!(started.elapsed() >= Duration::from_millis(25));

        // A poke wakes the next wait immediately, and is consumed by it.
        queue.notify();
        let started = Instant::now();
        assert!(!queue.wait_for_work(Duration::from_millis(200), &shutdown));
        assert!(started.elapsed() < Duration::from_millis(100));

        // Shutdown short-circuits the park entirely.
        shutdown.store(true, Ordering::Release);
        let started = Instant::now();
        queue.wait_for_work(Duration::from_millis(200), &shutdown);
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
