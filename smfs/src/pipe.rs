//! Bounded single-producer/single-consumer byte pipe.
//!
//! Backpressure for stream sessions: the HTTP worker writes into the pipe
//! and blocks when it is full; the filesystem read path drains it and
//! blocks when it is empty. Both sides re-check the stop flag after every
//! wakeup, so asserting stop (plus [`BoundedPipe::wake_all`]) unblocks the
//! pipe without tearing anything down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Default pipe capacity for stream sessions.
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// Result of a producer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All or a leading portion of the bytes were appended. The count is
    /// less than the requested length only when stop fired mid-write;
    /// whatever was appended can still be drained by readers.
    Completed(usize),
    /// Stop fired before any byte was placed.
    Aborted,
}

struct State {
    buf: VecDeque<u8>,
    /// Set once a read observes stop while empty; the pipe is not
    /// restartable after that point.
    eof: bool,
}

pub struct BoundedPipe {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BoundedPipe {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
                eof: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy. Advisory; may be stale by the time it is read.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `bytes`, blocking while the pipe is full until space frees up
    /// or `stop` is asserted.
    pub fn write(&self, bytes: &[u8], stop: &AtomicBool) -> WriteOutcome {
        let mut state = self.state.lock().unwrap();
        let mut written = 0;
        while written < bytes.len() {
            while state.buf.len() >= self.capacity && !stop.load(Ordering::SeqCst) {
                state = self.not_full.wait(state).unwrap();
            }
            if stop.load(Ordering::SeqCst) {
                return if written == 0 {
                    WriteOutcome::Aborted
                } else {
                    WriteOutcome::Completed(written)
                };
            }
            let room = self.capacity - state.buf.len();
            let take = room.min(bytes.len() - written);
            state.buf.extend(&bytes[written..written + take]);
            written += take;
            self.not_empty.notify_one();
        }
        WriteOutcome::Completed(written)
    }

    /// Remove up to `buf.len()` bytes from the head, blocking while the
    /// pipe is empty and stop is not asserted.
    ///
    /// Returns as soon as at least one byte was copied, or 0 once stop has
    /// been observed on an empty pipe (EOF). EOF is sticky: later reads
    /// return 0 immediately even if writes resume.
    pub fn read(&self, buf: &mut [u8], stop: &AtomicBool) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        loop {
            if state.eof {
                return 0;
            }
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                self.not_full.notify_one();
                return n;
            }
            if stop.load(Ordering::SeqCst) {
                state.eof = true;
                self.not_full.notify_all();
                return 0;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Drop all buffered bytes and wake waiters.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.buf.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wake every blocked producer and consumer so they can observe a
    /// freshly asserted stop flag.
    pub fn wake_all(&self) {
        let _state = self.state.lock().unwrap();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let pipe = BoundedPipe::new(16);
        let stop = AtomicBool::new(false);
        assert_eq!(pipe.write(b"hello", &stop), WriteOutcome::Completed(5));
        let mut buf = [0u8; 8];
        let n = pipe.read(&mut buf, &stop);
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_returns_available_bytes_without_waiting_for_more() {
        let pipe = BoundedPipe::new(16);
        let stop = AtomicBool::new(false);
        pipe.write(b"ab", &stop);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf, &stop), 2);
    }

    #[test]
    fn read_on_empty_stopped_pipe_is_eof() {
        let pipe = BoundedPipe::new(16);
        let stop = AtomicBool::new(true);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf, &stop), 0);
    }

    #[test]
    fn eof_is_sticky_even_if_writes_resume() {
        let pipe = BoundedPipe::new(16);
        let stop = AtomicBool::new(true);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf, &stop), 0);

        stop.store(false, Ordering::SeqCst);
        pipe.write(b"late", &stop);
        assert_eq!(pipe.read(&mut buf, &stop), 0);
    }

    #[test]
    fn stopped_reads_drain_buffered_bytes_first() {
        let pipe = BoundedPipe::new(16);
        let stop = AtomicBool::new(false);
        pipe.write(b"tail", &stop);
        stop.store(true, Ordering::SeqCst);

        let mut buf = [0u8; 8];
        let n = pipe.read(&mut buf, &stop);
        assert_eq!(&buf[..n], b"tail");
        assert_eq!(pipe.read(&mut buf, &stop), 0);
    }

    #[test]
    fn write_aborts_when_stop_set_before_any_byte() {
        let pipe = BoundedPipe::new(4);
        let stop = AtomicBool::new(false);
        assert_eq!(pipe.write(b"full", &stop), WriteOutcome::Completed(4));

        stop.store(true, Ordering::SeqCst);
        assert_eq!(pipe.write(b"more", &stop), WriteOutcome::Aborted);
    }

    #[test]
    fn full_pipe_blocks_writer_until_reader_drains() {
        let pipe = Arc::new(BoundedPipe::new(4));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let pipe = Arc::clone(&pipe);
            let stop = Arc::clone(&stop);
            thread::spawn(move || pipe.write(b"abcdefgh", &stop))
        };

        thread::sleep(Duration::from_millis(20));
        let mut collected = Vec::new();
        let mut buf = [0u8; 3];
        while collected.len() < 8 {
            let n = pipe.read(&mut buf, &stop);
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(writer.join().unwrap(), WriteOutcome::Completed(8));
        assert_eq!(collected, b"abcdefgh");
    }

    #[test]
    fn wake_all_unblocks_stopped_reader() {
        let pipe = Arc::new(BoundedPipe::new(4));
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let pipe = Arc::clone(&pipe);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                pipe.read(&mut buf, &stop)
            })
        };

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::SeqCst);
        pipe.wake_all();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn concurrent_transfer_preserves_order_and_capacity_bound() {
        const TOTAL: usize = 64 * 1024;
        let pipe = Arc::new(BoundedPipe::new(997));
        let stop = Arc::new(AtomicBool::new(false));

        let expected: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();

        let writer = {
            let pipe = Arc::clone(&pipe);
            let stop = Arc::clone(&stop);
            let data = expected.clone();
            thread::spawn(move || {
                // pseudo-random chunk sizes from a fixed-seed LCG
                let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
                let mut sent = 0;
                while sent < data.len() {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                    let chunk = 1 + (seed >> 33) as usize % 4096;
                    let end = (sent + chunk).min(data.len());
                    assert_eq!(
                        pipe.write(&data[sent..end], &stop),
                        WriteOutcome::Completed(end - sent)
                    );
                    sent = end;
                }
            })
        };

        let mut collected = Vec::with_capacity(TOTAL);
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut buf = vec![0u8; 4096];
        while collected.len() < TOTAL {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let want = 1 + (seed >> 33) as usize % buf.len();
            let n = pipe.read(&mut buf[..want], &stop);
            assert!(pipe.len() <= pipe.capacity());
            collected.extend_from_slice(&buf[..n]);
        }

        writer.join().unwrap();
        assert_eq!(collected, expected);
    }
}
