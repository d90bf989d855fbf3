//! Bounded, deduplicating flush queue.
//!
//! The single hand-off point between the fast path (mutate memory, return)
//! and the slow path (serialize + durable write). Producers block when the
//! backlog is full; the consumer blocks when it is empty; one condition
//! variable serves both sides.
//!
//! Enqueuing is set-based: an item already waiting is not queued twice, so a
//! burst of mutations to one inode collapses into a single flush pass that
//! reads the entry's latest state at drain time.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use parking_lot::{Condvar, Mutex};

use metafs_types::{make_error, MdCode, Result};

struct Inner<T> {
    order: VecDeque<T>,
    members: HashSet<T>,
    closed: bool,
}

pub struct BoundedFlushQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T: Copy + Eq + Hash> BoundedFlushQueue<T> {
    /// Create a queue holding at most `capacity` distinct items.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "flush queue capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(capacity),
                members: HashSet::with_capacity(capacity),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// An item already waiting dedupes to a no-op without blocking. Fails
    /// only when the queue has been closed.
    pub fn push(&self, item: T) -> Result<()> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return make_error(MdCode::QUEUE_CLOSED);
            }
            if inner.members.contains(&item) {
                return Ok(());
            }
            if inner.order.len() < self.capacity {
                break;
            }
            self.cond.wait(&mut inner);
        }
        inner.order.push_back(item);
        inner.members.insert(item);
        self.cond.notify_all();
        Ok(())
    }

    /// Dequeue the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.order.pop_front() {
                inner.members.remove(&item);
                self.cond.notify_all();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Close the queue: blocked producers fail, and the consumer drains the
    /// remaining items and then sees `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = BoundedFlushQueue::new(8);
        q.push(3u64).unwrap();
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert!(q.is_empty());
    }

    #[test]
    fn test_duplicate_push_dedupes() {
        let q = BoundedFlushQueue::new(8);
        q.push(7u64).unwrap();
        q.push(7).unwrap();
        q.push(7).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(7));
        // After draining, the same id can queue again.
        q.push(7).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_full_queue_blocks_producer_until_drain() {
        let q = Arc::new(BoundedFlushQueue::new(3));
        for i in 0..3u64 {
            q.push(i).unwrap();
        }

        let blocked = Arc::new(AtomicBool::new(true));
        let producer = {
            let q = Arc::clone(&q);
            let blocked = Arc::clone(&blocked);
            thread::spawn(move || {
                q.push(99).unwrap();
                blocked.store(false, Ordering::SeqCst);
            })
        };

        // Give the producer ample time to hit the full queue.
        thread::sleep(Duration::from_millis(50));
        assert!(blocked.load(Ordering::SeqCst), "producer should be blocked");
        assert_eq!(q.len(), 3);

        // Draining exactly one item unblocks it.
        assert_eq!(q.pop(), Some(0));
        producer.join().unwrap();
        assert!(!blocked.load(Ordering::SeqCst));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_duplicate_push_does_not_block_on_full_queue() {
        let q = BoundedFlushQueue::new(2);
        q.push(1u64).unwrap();
        q.push(2).unwrap();
        // 1 is already queued; this must return immediately even though the
        // queue is at capacity.
        q.push(1).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(BoundedFlushQueue::new(4));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(42u64).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_wakes_everyone() {
        let q = Arc::new(BoundedFlushQueue::<u64>::new(1));
        q.push(1).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();

        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.code(), MdCode::QUEUE_CLOSED);

        // The consumer still drains what was queued, then sees None.
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_many_producers_one_consumer() {
        let q = Arc::new(BoundedFlushQueue::new(5));
        let producers: Vec<_> = (0..4u64)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..50 {
                        q.push(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut seen = 0usize;
                while q.pop().is_some() {
                    seen += 1;
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        q.close();
        // All 200 distinct ids arrive exactly once.
        assert_eq!(consumer.join().unwrap(), 200);
    }
}
