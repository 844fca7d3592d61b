//! Audio-master clocks and the sync decision.
//!
//! Each clock has exactly one writer (the audio decode pipeline for the audio clock, the
//! presenter for the video clock) and is read from the other side without locking.
//! Values are `f64` seconds stored as raw bits in an `AtomicU64` with relaxed ordering:
//! readers may see a slightly stale value, which the sync tolerance absorbs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Seconds counter shared between threads.
#[derive(Debug)]
pub struct Clock {
    bits: AtomicU64,
}

impl Clock {
    pub fn new(seconds: f64) -> Self {
        Self {
            bits: AtomicU64::new(seconds.to_bits()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Add `seconds`. Only the clock's single writer may call this.
    pub fn advance(&self, seconds: f64) -> f64 {
        let next = self.get() + seconds;
        self.set(next);
        next
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// The pair of clocks a session shares across its threads.
#[derive(Debug, Default)]
pub struct SessionClocks {
    pub audio: Clock,
    pub video: Clock,
}

/// What the presentation loop does with the next picture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncDecision {
    /// Within tolerance of the audio clock: show it now.
    Display,
    /// Too far behind the audio clock: skip it.
    Drop,
    /// Ahead of the audio clock by the given amount: wait, then re-check.
    Delay(Duration),
}

/// Compare a picture timestamp with the audio clock.
///
/// `|pts - audio| <= tolerance` displays, a picture behind by more than the tolerance is
/// dropped, and one ahead by more than the tolerance is delayed by the difference.
pub fn decide(picture_pts: f64, audio_clock: f64, tolerance: f64) -> SyncDecision {
    let diff = picture_pts - audio_clock;
    if !diff.is_finite() {
        return SyncDecision::Display;
    }
    if diff.abs() <= tolerance {
        SyncDecision::Display
    } else if diff < 0.0 {
        SyncDecision::Drop
    } else {
        SyncDecision::Delay(Duration::from_secs_f64(diff))
    }
}
