//! Fixed-capacity ring of converted pictures handed from the video decode thread to the
//! presentation loop.
//!
//! Queue bookkeeping (indices, size, abort flag) lives under one mutex/condvar pair while
//! each slot's pixels sit behind their own mutex, so filling or rendering a slot never
//! holds the queue lock. With the default capacity of 1 the producer and the consumer
//! strictly alternate.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::media::PixelFormat;

/// A converted picture ready for presentation. Slots are reused; `data` keeps its
/// allocation between frames.
#[derive(Clone, Debug)]
pub struct Picture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp in seconds.
    pub pts: f64,
}

impl Picture {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Rgb24,
            pts: 0.0,
        }
    }
}

/// Outcome of a slot acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// Index of the slot the caller may now fill (write) or render (read).
    Slot(usize),
    /// Non-blocking caller: queue full (write) or empty (read).
    WouldBlock,
    /// Quit was raised.
    Aborted,
    /// Read side only: the producer finished and every picture has been read.
    Finished,
}

struct RingState {
    size: usize,
    write_index: usize,
    read_index: usize,
    aborted: bool,
    finished: bool,
}

pub struct PictureQueue {
    slots: Vec<Mutex<Picture>>,
    state: Mutex<RingState>,
    cv: Condvar,
}

impl PictureQueue {
    /// Create a queue with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| Mutex::new(Picture::empty())).collect(),
            state: Mutex::new(RingState {
                size: 0,
                write_index: 0,
                read_index: 0,
                aborted: false,
                finished: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock slot `index` for filling or rendering.
    pub fn slot(&self, index: usize) -> MutexGuard<'_, Picture> {
        self.slots[index].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for a free slot and return its index.
    pub fn acquire_write_slot(&self, blocking: bool) -> Acquire {
        let mut g = self.state();
        loop {
            if g.aborted {
                return Acquire::Aborted;
            }
            if g.size < self.capacity() {
                return Acquire::Slot(g.write_index);
            }
            if !blocking {
                return Acquire::WouldBlock;
            }
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Publish the slot returned by the last `acquire_write_slot`.
    pub fn commit_write(&self) {
        let mut g = self.state();
        assert!(
            g.size < self.capacity(),
            "picture queue commit_write on a full queue"
        );
        g.write_index = (g.write_index + 1) % self.capacity();
        g.size += 1;
        drop(g);
        self.cv.notify_all();
    }

    /// Wait for a filled slot and return its index.
    pub fn acquire_read_slot(&self, blocking: bool) -> Acquire {
        let mut g = self.state();
        loop {
            if g.aborted {
                return Acquire::Aborted;
            }
            if g.size > 0 {
                return Acquire::Slot(g.read_index);
            }
            if g.finished {
                return Acquire::Finished;
            }
            if !blocking {
                return Acquire::WouldBlock;
            }
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Release the slot returned by the last `acquire_read_slot`.
    pub fn commit_read(&self) {
        let mut g = self.state();
        assert!(g.size > 0, "picture queue commit_read on an empty queue");
        g.read_index = (g.read_index + 1) % self.capacity();
        g.size -= 1;
        drop(g);
        self.cv.notify_all();
    }

    /// Wake every waiter; later acquisitions return [`Acquire::Aborted`]. Idempotent.
    pub fn abort(&self) {
        let mut g = self.state();
        g.aborted = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Producer is done; readers drain what is left, then get [`Acquire::Finished`].
    pub fn finish(&self) {
        let mut g = self.state();
        g.finished = true;
        drop(g);
        self.cv.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    /// Filled slots awaiting presentation.
    pub fn len(&self) -> usize {
        self.state().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
