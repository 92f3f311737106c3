//! Blocking byte ring buffer between the network thread and the playback device.
//!
//! The producer (service thread) and consumer (device pull callback or a
//! playback writer) run at unrelated cadences. `put` blocks while the buffer
//! lacks room, `get` blocks while it lacks data, and `shutdown` releases every
//! waiter with [`VoxError::RingBufferClosed`].
//!
//! Real-time callbacks must not block, so they use [`RingBuffer::try_get`] and
//! substitute silence themselves when it returns `false`.

pub mod capture;

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, VoxError};

pub use capture::CaptureBuffer;

struct RingState {
    storage: Box<[u8]>,
    write_pos: usize,
    read_pos: usize,
    used: usize,
    active: bool,
}

impl RingState {
    fn free(&self) -> usize {
        self.storage.len() - self.used
    }

    fn write(&mut self, data: &[u8]) {
        let cap = self.storage.len();
        let first = data.len().min(cap - self.write_pos);
        self.storage[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&data[first..]);
        }
        self.write_pos = (self.write_pos + data.len()) % cap;
        self.used += data.len();
    }

    fn read(&mut self, out: &mut [u8]) {
        let cap = self.storage.len();
        let first = out.len().min(cap - self.read_pos);
        out[..first].copy_from_slice(&self.storage[self.read_pos..self.read_pos + first]);
        let rest = out.len() - first;
        if rest > 0 {
            out[first..].copy_from_slice(&self.storage[..rest]);
        }
        self.read_pos = (self.read_pos + out.len()) % cap;
        self.used -= out.len();
    }
}

/// Bounded circular byte buffer with blocking put/get and a one-way shutdown latch.
pub struct RingBuffer {
    capacity: usize,
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes. A zero capacity is
    /// bumped to one byte so the modular arithmetic stays defined.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                used: 0,
                active: true,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Block until all of `data` fits, then append it.
    ///
    /// # Errors
    /// - `RingBufferClosed` if the buffer is (or becomes) shut down.
    /// - `ChunkTooLarge` if `data` could never fit.
    pub fn put(&self, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(VoxError::RingBufferClosed);
            }
            if state.free() >= data.len() {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.write(data);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Like [`put`](Self::put) but gives up at `timeout`, returning `Ok(false)`
    /// without writing anything.
    pub fn put_timeout(&self, data: &[u8], timeout: Duration) -> Result<bool> {
        self.check_len(data.len())?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(VoxError::RingBufferClosed);
            }
            if state.free() >= data.len() {
                break;
            }
            if self.not_full.wait_until(&mut state, deadline).timed_out() {
                if !state.active {
                    return Err(VoxError::RingBufferClosed);
                }
                if state.free() < data.len() {
                    return Ok(false);
                }
                break;
            }
        }
        state.write(data);
        self.not_empty.notify_one();
        Ok(true)
    }

    /// Block until `out.len()` bytes are available, then fill `out` with them.
    pub fn get(&self, out: &mut [u8]) -> Result<()> {
        self.check_len(out.len())?;
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(VoxError::RingBufferClosed);
            }
            if state.used >= out.len() {
                break;
            }
            self.not_empty.wait(&mut state);
        }
        state.read(out);
        self.not_full.notify_one();
        Ok(())
    }

    /// Like [`get`](Self::get) but gives up at `timeout`, returning `Ok(false)`
    /// and leaving `out` untouched.
    pub fn get_timeout(&self, out: &mut [u8], timeout: Duration) -> Result<bool> {
        self.check_len(out.len())?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(VoxError::RingBufferClosed);
            }
            if state.used >= out.len() {
                break;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                if !state.active {
                    return Err(VoxError::RingBufferClosed);
                }
                if state.used < out.len() {
                    return Ok(false);
                }
                break;
            }
        }
        state.read(out);
        self.not_full.notify_one();
        Ok(true)
    }

    /// Fill `out` only if enough bytes are already buffered. Never blocks.
    pub fn try_get(&self, out: &mut [u8]) -> Result<bool> {
        self.check_len(out.len())?;
        let mut state = self.state.lock();
        if !state.active {
            return Err(VoxError::RingBufferClosed);
        }
        if state.used < out.len() {
            return Ok(false);
        }
        state.read(out);
        self.not_full.notify_one();
        Ok(true)
    }

    /// Clear the active latch, release storage and wake every waiter.
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        state.active = false;
        state.used = 0;
        state.storage = Box::default();
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Bytes currently buffered and unread.
    pub fn len(&self) -> usize {
        self.state.lock().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.capacity {
            return Err(VoxError::ChunkTooLarge {
                len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("used", &state.used)
            .field("active", &state.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_then_get_wraps_around_storage() {
        let ring = RingBuffer::new(8);
        let mut out = [0u8; 6];

        ring.put(&[1, 2, 3, 4, 5, 6]).unwrap();
        ring.get(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        // write_pos is now 6, so this write straddles the end of storage.
        ring.put(&[7, 8, 9, 10, 11]).unwrap();
        let mut out = [0u8; 5];
        ring.get(&mut out).unwrap();
        assert_eq!(out, [7, 8, 9, 10, 11]);
        assert!(ring.is_empty());
    }

    #[test]
    fn oversized_requests_fail_immediately() {
        let ring = RingBuffer::new(4);
        let err = ring.put(&[0; 5]).unwrap_err();
        assert!(matches!(err, VoxError::ChunkTooLarge { len: 5, capacity: 4 }));
        let mut out = [0u8; 5];
        assert!(ring.try_get(&mut out).is_err());
    }

    #[test]
    fn try_get_does_not_consume_partial_data() {
        let ring = RingBuffer::new(16);
        ring.put(&[9, 9, 9]).unwrap();
        let mut out = [0u8; 4];
        assert!(!ring.try_get(&mut out).unwrap());
        assert_eq!(ring.len(), 3);
        ring.put(&[9]).unwrap();
        assert!(ring.try_get(&mut out).unwrap());
        assert_eq!(out, [9; 4]);
    }

    #[test]
    fn timeouts_leave_state_untouched() {
        let ring = RingBuffer::new(4);
        ring.put(&[1, 2, 3]).unwrap();
        assert!(!ring.put_timeout(&[4, 5], Duration::from_millis(20)).unwrap());
        assert_eq!(ring.len(), 3);

        let mut out = [0u8; 4];
        assert!(!ring.get_timeout(&mut out, Duration::from_millis(20)).unwrap());
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn spsc_transfer_preserves_order_without_loss() {
        let ring = Arc::new(RingBuffer::new(37));
        let total: usize = 20_000;
        let expected: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

        let producer = {
            let ring = Arc::clone(&ring);
            let data = expected.clone();
            thread::spawn(move || {
                // Uneven chunk sizes exercise every wrap offset.
                let mut pos = 0;
                let mut step = 1;
                while pos < data.len() {
                    let end = (pos + step).min(data.len());
                    ring.put(&data[pos..end]).unwrap();
                    pos = end;
                    step = step % 13 + 1;
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut step = 7;
        while received.len() < total {
            let n = step.min(total - received.len());
            let mut buf = vec![0u8; n];
            ring.get(&mut buf).unwrap();
            received.extend_from_slice(&buf);
            step = step % 11 + 1;
        }

        producer.join().expect("producer panicked");
        assert_eq!(received, expected);
    }

    #[test]
    fn shutdown_releases_blocked_reader() {
        let ring = Arc::new(RingBuffer::new(8));
        let reader = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut out = [0u8; 4];
                ring.get(&mut out)
            })
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        ring.shutdown();
        let result = reader.join().expect("reader panicked");
        assert!(matches!(result, Err(VoxError::RingBufferClosed)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn shutdown_releases_blocked_writer_and_is_final() {
        let ring = Arc::new(RingBuffer::new(4));
        ring.put(&[1, 2, 3, 4]).unwrap();
        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.put(&[5]))
        };

        thread::sleep(Duration::from_millis(50));
        ring.shutdown();
        ring.shutdown();
        assert!(matches!(
            writer.join().expect("writer panicked"),
            Err(VoxError::RingBufferClosed)
        ));
        assert!(!ring.is_active());
        assert!(matches!(ring.put(&[1]), Err(VoxError::RingBufferClosed)));
        let mut out = [0u8; 1];
        assert!(matches!(ring.try_get(&mut out), Err(VoxError::RingBufferClosed)));
    }
}
