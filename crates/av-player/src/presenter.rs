//! Presentation loop: reads pictures and shows, drops or delays each one against the
//! audio clock.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::clock::{SyncDecision, decide};
use crate::error::Result;
use crate::picture_queue::{Acquire, Picture};
use crate::session::SessionContext;
use crate::stats::PlaybackStats;

/// Upper bound on a single sleep while a picture is early, so quit and clock jumps are
/// noticed promptly.
const DELAY_STEP: Duration = Duration::from_millis(10);
/// Longest wait between pictures once audio has drained and the wall clock paces video.
const MAX_DRAINED_WAIT: f64 = 0.5;

/// Where presented pictures end up (a window, an encoder, a test recorder).
pub trait VideoSink {
    fn present(&mut self, picture: &Picture) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PresentOutcome {
    Displayed(f64),
    Dropped(f64),
    Aborted,
    /// The video pipeline finished and every picture has been consumed.
    Finished,
}

pub struct Presenter {
    ctx: Arc<SessionContext>,
}

impl Presenter {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Present pictures until the video ends or quit is raised.
    pub fn run(&mut self, sink: &mut dyn VideoSink) -> Result<()> {
        loop {
            match self.present_next(sink)? {
                PresentOutcome::Displayed(_) | PresentOutcome::Dropped(_) => {}
                PresentOutcome::Aborted => return Ok(()),
                PresentOutcome::Finished => {
                    let stats = self.ctx.stats.snapshot();
                    tracing::info!(
                        displayed = stats.pictures_displayed,
                        dropped = stats.pictures_dropped,
                        "presentation finished"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Wait for the next picture and apply the sync decision to it.
    pub fn present_next(&mut self, sink: &mut dyn VideoSink) -> Result<PresentOutcome> {
        let index = match self.ctx.pictures.acquire_read_slot(true) {
            Acquire::Slot(index) => index,
            Acquire::Finished => return Ok(PresentOutcome::Finished),
            Acquire::Aborted | Acquire::WouldBlock => return Ok(PresentOutcome::Aborted),
        };
        let pts = self.ctx.pictures.slot(index).pts;

        loop {
            if self.ctx.quit_requested() {
                return Ok(PresentOutcome::Aborted);
            }
            match self.decision(pts) {
                SyncDecision::Display => return self.display(index, pts, sink),
                SyncDecision::Drop => {
                    tracing::debug!(pts, audio = self.ctx.clocks.audio.get(), "late picture dropped");
                    self.ctx.pictures.commit_read();
                    PlaybackStats::bump(&self.ctx.stats.pictures_dropped, 1);
                    return Ok(PresentOutcome::Dropped(pts));
                }
                SyncDecision::Delay(wait) => thread::sleep(wait.min(DELAY_STEP)),
            }
        }
    }

    fn decision(&self, pts: f64) -> SyncDecision {
        if !self.ctx.audio_drained() {
            let audio = self.ctx.clocks.audio.get();
            return decide(pts, audio, self.ctx.config.sync_tolerance_secs);
        }
        // No audio left to follow: pace from the last displayed picture.
        let wait = (pts - self.ctx.clocks.video.get()).clamp(0.0, MAX_DRAINED_WAIT);
        self.sleep_unless_quit(Duration::from_secs_f64(wait));
        SyncDecision::Display
    }

    fn sleep_unless_quit(&self, total: Duration) {
        let mut left = total;
        while !left.is_zero() && !self.ctx.quit_requested() {
            let step = left.min(DELAY_STEP);
            thread::sleep(step);
            left -= step;
        }
    }

    fn display(&mut self, index: usize, pts: f64, sink: &mut dyn VideoSink) -> Result<PresentOutcome> {
        let shown = {
            let picture = self.ctx.pictures.slot(index);
            sink.present(&picture)
        };
        self.ctx.pictures.commit_read();
        shown?;

        self.ctx.clocks.video.set(pts);
        PlaybackStats::bump(&self.ctx.stats.pictures_displayed, 1);
        Ok(PresentOutcome::Displayed(pts))
    }
}
