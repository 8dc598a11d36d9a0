// packages/engine/src/recording/event_queue.rs
//! Lock-free bounded snapshot queue
//!
//! Pushes never block: when the queue is full the item is handed back and
//! counted as dropped.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free bounded MPMC queue with counters
pub struct EventQueue<T> {
    queue: ArrayQueue<T>,

    /// Push counter
    push_count: AtomicU64,

    /// Pop counter
    pop_count: AtomicU64,

    /// Drop counter (queue full)
    drop_count: AtomicU64,
}

impl<T> EventQueue<T> {
    /// Create a new queue; `capacity` must be non-zero
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Push an item (non-blocking, lock-free)
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.queue.push(item) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(item) => {
                self.drop_count.fetch_add(1, Ordering::Relaxed);
                Err(item)
            }
        }
    }

    /// Try to pop an item (non-blocking)
    pub fn try_pop(&self) -> Option<T> {
        let item = self.queue.pop()?;
        self.pop_count.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total items pushed
    pub push_count: u64,

    /// Total items popped
    pub pop_count: u64,

    /// Total items dropped (queue full)
    pub drop_count: u64,

    pub current_size: usize,

    pub capacity: usize,
}

impl QueueStats {
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Dropped items as a percentage of all push attempts
    pub fn drop_rate(&self) -> f64 {
        let attempts = self.push_count + self.drop_count;
        if attempts == 0 {
            0.0
        } else {
            (self.drop_count as f64 / attempts as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_creation() {
        let queue: EventQueue<u32> = EventQueue::new(100);
        assert_eq!(queue.capacity(), 100);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_pop_fifo() {
        let queue = EventQueue::new(10);
        queue.push("a").unwrap();
        queue.push("b").unwrap();

        assert_eq!(queue.try_pop(), Some("a"));
        assert_eq!(queue.try_pop(), Some("b"));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_queue_full_hands_item_back() {
        let queue = EventQueue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        assert!(queue.is_full());
        assert_eq!(queue.push(3), Err(3));

        let stats = queue.stats();
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.push_count, 2);
        assert!((stats.drop_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue: EventQueue<u8> = EventQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(EventQueue::new(1000));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let q = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let _ = q.push(i * 100 + j);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.push_count + stats.drop_count, 1000);
        assert_eq!(stats.current_size, 1000);
    }
}
