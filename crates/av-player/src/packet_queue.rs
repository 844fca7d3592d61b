//! Thread-safe blocking FIFO of compressed units.
//!
//! One queue exists per stream:
//! - demux thread → `put`
//! - decode thread (or the audio render bridge) → `get`
//!
//! Shutdown is deterministic: `abort()` wakes every waiter and all later `get` calls
//! return [`Get::Aborted`]. `finish()` is the softer end-of-input signal that lets
//! consumers drain what is left.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::media::CompressedUnit;

/// Result of [`PacketQueue::get`].
#[derive(Debug, PartialEq)]
pub enum Get {
    /// The head unit; the caller now owns it.
    Unit(CompressedUnit),
    /// Nothing queued: non-blocking caller, or the producer finished and the queue drained.
    Empty,
    /// The queue was aborted while waiting or before the call.
    Aborted,
}

/// Thread-safe FIFO of [`CompressedUnit`]s with byte accounting.
///
/// ## Design
/// - One mutex guards the units, the byte total and both flags.
/// - One [`Condvar`] is used as a general "state changed" signal for consumers
///   and for the demuxer waiting on backpressure.
/// - `bytes` always equals the sum of `size()` over the contained units.
pub struct PacketQueue {
    name: &'static str,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    units: VecDeque<CompressedUnit>,
    bytes: usize,
    aborted: bool,
    finished: bool,
}

impl PacketQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(QueueInner {
                units: VecDeque::new(),
                bytes: 0,
                aborted: false,
                finished: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `unit` at the tail and wake one waiter.
    ///
    /// Returns the unit back to the caller if the queue was aborted or finished.
    pub fn put(&self, unit: CompressedUnit) -> Result<(), CompressedUnit> {
        let mut g = self.lock();
        if g.aborted || g.finished {
            return Err(unit);
        }
        g.bytes += unit.size();
        g.units.push_back(unit);
        drop(g);
        self.cv.notify_one();
        Ok(())
    }

    /// Pop the head unit.
    ///
    /// When empty and `blocking`, waits until a `put`, `finish` or `abort` wakes it.
    pub fn get(&self, blocking: bool) -> Get {
        let mut g = self.lock();
        loop {
            if g.aborted {
                return Get::Aborted;
            }
            if let Some(unit) = g.units.pop_front() {
                g.bytes -= unit.size();
                drop(g);
                // Wakes a demuxer parked in `wait_below`.
                self.cv.notify_all();
                return Get::Unit(unit);
            }
            if !blocking || g.finished {
                return Get::Empty;
            }
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Abort the queue and wake all waiters.
    ///
    /// After calling this every blocked and future `get` returns [`Get::Aborted`] and `put`
    /// fails. Idempotent.
    pub fn abort(&self) {
        let mut g = self.lock();
        if !g.aborted {
            tracing::debug!(queue = self.name, units = g.units.len(), "packet queue aborted");
        }
        g.aborted = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Mark end of input. Queued units are still delivered; afterwards `get` returns
    /// [`Get::Empty`] instead of blocking. Idempotent.
    pub fn finish(&self) {
        let mut g = self.lock();
        g.finished = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Block while the queue holds at least `max_bytes`.
    ///
    /// Returns `false` if the queue was aborted.
    pub fn wait_below(&self, max_bytes: usize) -> bool {
        let mut g = self.lock();
        while g.bytes >= max_bytes && !g.aborted {
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
        !g.aborted
    }

    pub fn len(&self) -> usize {
        self.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().units.is_empty()
    }

    /// Total payload bytes currently queued.
    pub fn byte_size(&self) -> usize {
        self.lock().bytes
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Producer finished and every unit has been taken.
    pub fn is_drained(&self) -> bool {
        let g = self.lock();
        g.finished && g.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn unit(stream: usize, tag: u8, len: usize) -> CompressedUnit {
        CompressedUnit::new(stream, vec![tag; len])
    }

    #[test]
    fn get_preserves_put_order_without_loss() {
        let q = PacketQueue::new("test");
        for i in 0..50u8 {
            q.put(unit(0, i, i as usize + 1)).unwrap();
        }
        for i in 0..50u8 {
            match q.get(false) {
                Get::Unit(u) => assert_eq!(u.data[0], i),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(q.get(false), Get::Empty);
    }

    #[test]
    fn byte_size_tracks_contained_payloads() {
        let q = PacketQueue::new("test");
        q.put(unit(0, 1, 10)).unwrap();
        q.put(unit(0, 2, 32)).unwrap();
        assert_eq!(q.byte_size(), 42);
        assert_eq!(q.len(), 2);
        let _ = q.get(false);
        assert_eq!(q.byte_size(), 32);
        let _ = q.get(false);
        assert_eq!(q.byte_size(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_across_threads() {
        let q = Arc::new(PacketQueue::new("test"));
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    let u = CompressedUnit::new(0, i.to_le_bytes().to_vec());
                    q.put(u).unwrap();
                }
                q.finish();
            })
        };

        let mut seen = Vec::new();
        while let Get::Unit(u) = q.get(true) {
            seen.push(u32::from_le_bytes(u.data[..4].try_into().unwrap()));
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn put_after_abort_fails_without_enqueuing() {
        let q = PacketQueue::new("test");
        q.abort();
        q.abort();
        let rejected = q.put(unit(0, 7, 3)).unwrap_err();
        assert_eq!(rejected.data, vec![7; 3]);
        assert_eq!(q.len(), 0);
        assert_eq!(q.byte_size(), 0);
        assert_eq!(q.get(true), Get::Aborted);
        assert_eq!(q.get(false), Get::Aborted);
    }

    #[test]
    fn abort_wakes_blocked_getter_on_empty_queue() {
        let q = Arc::new(PacketQueue::new("test"));
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = {
            let q = q.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                tx.send(q.get(true)).unwrap();
            })
        };

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        q.abort();
        let got = rx.recv_timeout(Duration::from_secs(5)).expect("getter woke");
        assert_eq!(got, Get::Aborted);
        handle.join().unwrap();
    }

    #[test]
    fn blocking_get_waits_for_put() {
        let q = Arc::new(PacketQueue::new("test"));
        let handle = {
            let q = q.clone();
            thread::spawn(move || q.get(true))
        };
        thread::sleep(Duration::from_millis(10));
        q.put(unit(1, 9, 4)).unwrap();
        match handle.join().unwrap() {
            Get::Unit(u) => assert_eq!(u.stream, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn finish_drains_then_reports_empty() {
        let q = PacketQueue::new("test");
        q.put(unit(0, 1, 1)).unwrap();
        q.finish();
        assert!(q.put(unit(0, 2, 1)).is_err());
        assert!(!q.is_drained());
        assert!(matches!(q.get(true), Get::Unit(_)));
        assert_eq!(q.get(true), Get::Empty);
        assert!(q.is_drained());
    }

    #[test]
    fn wait_below_wakes_when_consumer_drains() {
        let q = Arc::new(PacketQueue::new("test"));
        q.put(unit(0, 1, 100)).unwrap();
        let handle = {
            let q = q.clone();
            thread::spawn(move || q.wait_below(50))
        };
        thread::sleep(Duration::from_millis(10));
        let _ = q.get(false);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_below_returns_false_on_abort() {
        let q = Arc::new(PacketQueue::new("test"));
        q.put(unit(0, 1, 100)).unwrap();
        let handle = {
            let q = q.clone();
            thread::spawn(move || q.wait_below(10))
        };
        thread::sleep(Duration::from_millis(10));
        q.abort();
        assert!(!handle.join().unwrap());
    }
}
