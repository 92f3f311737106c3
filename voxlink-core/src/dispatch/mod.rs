//! Outbound message queue multiplexing text and audio onto one connection.
//!
//! Producers (console thread, capture callback) enqueue without ever
//! blocking; a full queue rejects the message and leaves its state untouched.
//! The single consumer is the transport's writable handler, which takes one
//! message per writable event and re-arms the notification while messages
//! remain.
//!
//! ```text
//!  slots: [ _ | m1 | m2 | m3 | _ ]      N = capacity + 1
//!               ^head          ^tail    full when (tail + 1) % N == head
//! ```

pub mod message;

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{Result, VoxError};

pub use message::{MessageKind, QueuedMessage, INLINE_PAYLOAD_CAPACITY};

/// Default usable capacity, matching the device firmware's queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

struct QueueState {
    slots: Vec<Option<QueuedMessage>>,
    head: usize,
    tail: usize,
    active: bool,
}

impl QueueState {
    fn is_full(&self) -> bool {
        (self.tail + 1) % self.slots.len() == self.head
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn len(&self) -> usize {
        let n = self.slots.len();
        (self.tail + n - self.head) % n
    }

    fn pop(&mut self) -> Option<QueuedMessage> {
        if self.is_empty() {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        msg
    }
}

/// Bounded FIFO of [`QueuedMessage`]s with a single consumer.
pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl OutboundQueue {
    /// Create a queue holding up to `capacity` messages (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.resize_with(capacity + 1, || None);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                slots,
                head: 0,
                tail: 0,
                active: true,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Queue a text message.
    ///
    /// # Errors
    /// - `QueueFull` when no slot is free. Nothing is mutated.
    /// - `QueueClosed` after [`shutdown`](Self::shutdown).
    pub fn enqueue_text(&self, text: &str) -> Result<()> {
        self.push(QueuedMessage::text(text))
    }

    /// Queue a binary message. Same failure modes as [`enqueue_text`](Self::enqueue_text).
    pub fn enqueue_binary(&self, data: &[u8]) -> Result<()> {
        self.push(QueuedMessage::binary(data))
    }

    /// Queue an owned binary buffer without copying large payloads.
    pub fn enqueue_binary_owned(&self, data: Vec<u8>) -> Result<()> {
        self.push(QueuedMessage::binary_owned(data))
    }

    /// Queue an already-built message.
    pub fn push(&self, msg: QueuedMessage) -> Result<()> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(VoxError::QueueClosed);
        }
        if state.is_full() {
            return Err(VoxError::QueueFull {
                capacity: self.capacity,
            });
        }
        debug!(kind = ?msg.kind(), bytes = msg.len(), "message queued");
        let tail = state.tail;
        state.slots[tail] = Some(msg);
        state.tail = (tail + 1) % state.slots.len();
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove and return the oldest message, or `None` when empty or shut down.
    pub fn dequeue(&self) -> Option<QueuedMessage> {
        let mut state = self.state.lock();
        if !state.active {
            return None;
        }
        state.pop()
    }

    /// Wait up to `timeout` for a message.
    ///
    /// # Errors
    /// `QueueClosed` if the queue is shut down before or while waiting.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<QueuedMessage>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(VoxError::QueueClosed);
            }
            if !state.is_empty() {
                return Ok(state.pop());
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                if !state.active {
                    return Err(VoxError::QueueClosed);
                }
                return Ok(state.pop());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Drop all pending messages and refuse further traffic. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.active = false;
        let pending = state.len();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.head = 0;
        state.tail = 0;
        drop(state);
        self.not_empty.notify_all();
        if pending > 0 {
            debug!(pending, "outbound queue shut down with pending messages");
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_across_text_and_binary() {
        let queue = OutboundQueue::new(4);
        queue.enqueue_text("hello").unwrap();
        queue.enqueue_binary(&[1, 2, 3]).unwrap();
        queue.enqueue_text("bye").unwrap();

        let first = queue.dequeue().unwrap();
        assert_eq!(first.as_text(), Some("hello"));
        let second = queue.dequeue().unwrap();
        assert_eq!(second.kind(), MessageKind::Binary);
        assert_eq!(second.as_bytes(), &[1, 2, 3]);
        assert_eq!(queue.dequeue().unwrap().as_text(), Some("bye"));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn full_queue_rejects_without_mutation() {
        let queue = OutboundQueue::new(2);
        queue.enqueue_text("a").unwrap();
        queue.enqueue_text("b").unwrap();
        let err = queue.enqueue_text("c").unwrap_err();
        assert!(matches!(err, VoxError::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue().unwrap().as_text(), Some("a"));
        queue.enqueue_text("d").unwrap();
        assert_eq!(queue.dequeue().unwrap().as_text(), Some("b"));
        assert_eq!(queue.dequeue().unwrap().as_text(), Some("d"));
    }

    #[test]
    fn never_exceeds_capacity_under_concurrent_producers() {
        let queue = Arc::new(OutboundQueue::new(8));
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut accepted = 0;
                    for i in 0..50 {
                        if queue.enqueue_text(&format!("{p}-{i}")).is_ok() {
                            accepted += 1;
                        }
                        assert!(queue.len() <= 8);
                    }
                    accepted
                })
            })
            .collect();

        let mut drained = 0;
        let mut accepted = 0;
        for h in handles {
            accepted += h.join().expect("producer panicked");
        }
        while queue.dequeue().is_some() {
            drained += 1;
        }
        // No consumer ran, so exactly the first eight enqueues were accepted.
        assert_eq!(accepted, 8);
        assert_eq!(drained, 8);
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let queue = Arc::new(OutboundQueue::new(64));
        let a = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..30 {
                    queue.enqueue_text(&format!("a{i}")).unwrap();
                }
            })
        };
        for i in 0..30 {
            queue.enqueue_text(&format!("b{i}")).unwrap();
        }
        a.join().expect("producer panicked");

        let mut next_a = 0;
        let mut next_b = 0;
        while let Some(msg) = queue.dequeue() {
            let text = msg.as_text().unwrap().to_string();
            let (tag, n) = text.split_at(1);
            let n: usize = n.parse().unwrap();
            if tag == "a" {
                assert_eq!(n, next_a);
                next_a += 1;
            } else {
                assert_eq!(n, next_b);
                next_b += 1;
            }
        }
        assert_eq!((next_a, next_b), (30, 30));
    }

    #[test]
    fn owned_binary_moves_through_the_queue_without_a_copy() {
        let queue = OutboundQueue::new(2);
        let data = vec![9u8; 8192];
        let ptr = data.as_ptr();
        queue.enqueue_binary_owned(data).unwrap();

        let msg = queue.dequeue().unwrap();
        assert_eq!(msg.kind(), MessageKind::Binary);
        assert_eq!(msg.into_bytes().as_ptr(), ptr);
    }

    #[test]
    fn shutdown_releases_waiting_consumer_and_rejects_producers() {
        let queue = Arc::new(OutboundQueue::new(4));
        queue.enqueue_binary(&[0u8; 4096]).unwrap();
        assert!(queue.dequeue().is_some());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.shutdown();
        assert!(matches!(
            consumer.join().expect("consumer panicked"),
            Err(VoxError::QueueClosed)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(matches!(queue.enqueue_text("late"), Err(VoxError::QueueClosed)));
        assert!(queue.dequeue().is_none());
        queue.shutdown();
    }

    #[test]
    fn dequeue_timeout_wakes_on_enqueue() {
        let queue = Arc::new(OutboundQueue::new(4));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.enqueue_text("late").unwrap();
            })
        };
        let msg = queue
            .dequeue_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("message should arrive before the deadline");
        assert_eq!(msg.as_text(), Some("late"));
        producer.join().expect("producer panicked");

        assert!(queue
            .dequeue_timeout(Duration::from_millis(10))
            .unwrap()
            .is_none());
    }
}
