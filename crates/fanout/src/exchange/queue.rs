//! Multi-reader broadcast queue.
//!
//! The queue is a singly linked list of write-once cells. The writer owns
//! the empty tail cell; publishing fills it and appends a fresh empty one.
//! A cursor is just a pointer to a cell, so duplicating is O(1) and a
//! cursor sees exactly the values published after it was created.
//! Cells that no cursor can reach anymore are freed.
//!
//! ```text
//!   cursor a ──┐          cursor b ──┐         tail ──┐
//!              ▼                     ▼                ▼
//!           [m1] ──▶ [m2] ──▶ [m3] ──▶ [m4] ──▶ [    ]
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

struct Cell<T> {
    next: OnceLock<(T, Arc<Cell<T>>)>,
}

impl<T> Cell<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            next: OnceLock::new(),
        })
    }
}

impl<T> Drop for Cell<T> {
    // Unlink iteratively; a long unread chain would otherwise overflow the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some((_, cell)) = next {
            match Arc::try_unwrap(cell) {
                Ok(mut cell) => next = cell.next.take(),
                Err(_) => break,
            }
        }
    }
}

struct Shared<T> {
    tail: Mutex<Arc<Cell<T>>>,
    notify: Notify,
    closed: AtomicBool,
    published: AtomicU64,
}

/// Write end of the queue. Dropping it closes the queue.
pub struct BroadcastQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + Sync> BroadcastQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tail: Mutex::new(Cell::empty()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Append a value. Every cursor that exists right now will see it.
    pub fn publish(&self, value: T) {
        {
            let mut tail = self.shared.tail.lock();
            let next = Cell::empty();
            // The tail cell is only ever filled here, under the lock.
            let _ = tail.next.set((value, Arc::clone(&next)));
            *tail = next;
        }
        self.shared.published.fetch_add(1, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Create a cursor positioned after everything published so far.
    pub fn duplicate(&self) -> StreamCursor<T> {
        let position = Arc::clone(&self.shared.tail.lock());
        StreamCursor {
            shared: Arc::clone(&self.shared),
            position: Arc::new(Mutex::new(position)),
        }
    }

    /// Number of values published since creation.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Acquire)
    }

    /// Close the queue. Cursors drain what is left and then return `None`.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }
}

impl<T: Clone + Send + Sync> Default for BroadcastQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for BroadcastQueue<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }
}

impl<T> fmt::Debug for BroadcastQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastQueue")
            .field("published", &self.shared.published.load(Ordering::Relaxed))
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A read position in a [`BroadcastQueue`].
///
/// Clones share the position: a value read through one clone is not seen
/// by the others. Use [`BroadcastQueue::duplicate`] for an independent
/// reader.
pub struct StreamCursor<T> {
    shared: Arc<Shared<T>>,
    position: Arc<Mutex<Arc<Cell<T>>>>,
}

impl<T: Clone> StreamCursor<T> {
    /// Take the next value if one is available.
    pub fn try_recv(&self) -> Option<T> {
        let mut position = self.position.lock();
        let (value, next) = {
            let (value, next) = position.next.get()?;
            (value.clone(), Arc::clone(next))
        };
        *position = next;
        Some(value)
    }

    /// Wait for the next value.
    ///
    /// Returns `None` once the queue is closed and everything published
    /// before the close has been read.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }

            notified.await;
        }
    }

    /// Returns `true` if both cursors share one position.
    pub fn same_position(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.position, &other.position)
    }

    /// Returns `true` once the writer has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> Clone for StreamCursor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            position: Arc::clone(&self.position),
        }
    }
}

impl<T> fmt::Debug for StreamCursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCursor")
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cursor_sees_only_later_values() {
        let queue = BroadcastQueue::new();
        queue.publish("a");

        let cursor = queue.duplicate();
        assert_eq!(cursor.try_recv(), None);

        queue.publish("b");
        queue.publish("c");
        assert_eq!(cursor.try_recv(), Some("b"));
        assert_eq!(cursor.try_recv(), Some("c"));
        assert_eq!(cursor.try_recv(), None);
        assert_eq!(queue.published(), 3);
    }

    #[test]
    fn test_duplicates_are_independent() {
        let queue = BroadcastQueue::new();
        let first = queue.duplicate();
        queue.publish(1);
        let second = queue.duplicate();
        queue.publish(2);

        assert_eq!(first.try_recv(), Some(1));
        assert_eq!(second.try_recv(), Some(2));
        assert_eq!(first.try_recv(), Some(2));
        assert_eq!(second.try_recv(), None);
        assert!(!first.same_position(&second));
    }

    #[test]
    fn test_clones_share_position() {
        let queue = BroadcastQueue::new();
        let cursor = queue.duplicate();
        let clone = cursor.clone();
        queue.publish(1);
        queue.publish(2);

        assert_eq!(clone.try_recv(), Some(1));
        assert_eq!(cursor.try_recv(), Some(2));
        assert!(cursor.same_position(&clone));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let queue = BroadcastQueue::new();
        let cursor = queue.duplicate();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(v) = cursor.recv().await {
                seen.push(v);
            }
            seen
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..100u32 {
            queue.publish(i);
        }
        drop(queue);

        assert_eq!(reader.await.unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_full_suffix() {
        let queue = Arc::new(BroadcastQueue::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cursor = queue.duplicate();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    for _ in 0..500 {
                        seen.push(cursor.recv().await.unwrap());
                    }
                    seen
                })
            })
            .collect();

        let writer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..500u32 {
                    queue.publish(i);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        writer.await.unwrap();

        for reader in readers {
            assert_eq!(reader.await.unwrap(), (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_long_unread_chain_drops() {
        let queue = BroadcastQueue::new();
        let cursor = queue.duplicate();
        for i in 0..200_000u32 {
            queue.publish(i);
        }
        drop(cursor);
        drop(queue);
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let queue = BroadcastQueue::new();
        let cursor = queue.duplicate();
        queue.publish(7);
        queue.close();

        assert!(cursor.is_closed());
        assert_eq!(cursor.recv().await, Some(7));
        assert_eq!(cursor.recv().await, None);
    }
}
