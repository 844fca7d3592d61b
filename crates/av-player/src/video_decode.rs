//! Video decode pipeline: packets → decoded frames → converted, timestamped pictures.

use std::sync::Arc;

use crate::decoder::{Decoder, Receive};
use crate::media::{CompressedUnit, StreamInfo, TimeBase, VideoFrame};
use crate::packet_queue::Get;
use crate::picture_queue::Acquire;
use crate::scale::Scaler;
use crate::session::{SessionContext, SessionEvent};
use crate::stats::PlaybackStats;

const FALLBACK_FRAME_RATE: f64 = 25.0;

/// Presentation timestamps for frames the container did not stamp.
///
/// Every real timestamp re-anchors the estimate; a missing one is the previous
/// timestamp plus one frame duration. Output never goes backwards.
#[derive(Clone, Debug)]
pub struct PtsEstimator {
    frame_duration: f64,
    last: Option<f64>,
}

impl PtsEstimator {
    /// `frame_rate` is the stream's nominal rate, when known.
    pub fn new(frame_rate: Option<f64>) -> Self {
        let rate = frame_rate
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(FALLBACK_FRAME_RATE);
        Self {
            frame_duration: 1.0 / rate,
            last: None,
        }
    }

    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    /// Timestamp for the next frame. `duration` overrides the nominal step for this frame.
    pub fn next(&mut self, stamped: Option<f64>, duration: Option<f64>) -> f64 {
        let step = duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.frame_duration);
        let pts = match (stamped.filter(|t| t.is_finite()), self.last) {
            (Some(t), Some(last)) => t.max(last),
            (Some(t), None) => t,
            (None, Some(last)) => last + step,
            (None, None) => 0.0,
        };
        self.last = Some(pts);
        pts
    }
}

pub struct VideoDecodePipeline {
    ctx: Arc<SessionContext>,
    decoder: Box<dyn Decoder<VideoFrame>>,
    scaler: Box<dyn Scaler>,
    time_base: TimeBase,
    estimator: PtsEstimator,
}

impl VideoDecodePipeline {
    pub fn new(
        ctx: Arc<SessionContext>,
        decoder: Box<dyn Decoder<VideoFrame>>,
        scaler: Box<dyn Scaler>,
        stream: &StreamInfo,
    ) -> Self {
        Self {
            ctx,
            decoder,
            scaler,
            time_base: stream.time_base,
            estimator: PtsEstimator::new(stream.frame_rate),
        }
    }

    /// Decode until the video queue is drained or aborted.
    ///
    /// On a clean end the picture queue is finished so the presenter can stop.
    pub fn run(mut self) {
        let mut units = 0u64;
        loop {
            let unit = match self.ctx.video_queue.get(true) {
                Get::Unit(unit) => unit,
                Get::Empty => break,
                Get::Aborted => {
                    tracing::debug!(units, "video decode aborted");
                    return;
                }
            };
            units += 1;
            if !self.decode_unit(&unit) {
                return;
            }
        }

        tracing::info!(units, "video decode finished");
        self.ctx.pictures.finish();
        self.ctx.emit(SessionEvent::VideoFinished);
    }

    /// Returns `false` once the picture queue is aborted.
    fn decode_unit(&mut self, unit: &CompressedUnit) -> bool {
        if let Err(e) = self.decoder.submit(unit) {
            PlaybackStats::bump(&self.ctx.stats.video_decode_errors, 1);
            tracing::warn!("video unit skipped: {e}");
            return true;
        }

        let mut stamped = unit.dts.or(unit.pts);
        let duration = unit.duration.and_then(|d| self.time_base.to_seconds(d));
        loop {
            let frame = match self.decoder.receive() {
                Ok(Receive::Frame(frame)) => frame,
                Ok(Receive::WouldBlock) | Ok(Receive::EndOfStream) => return true,
                Err(e) => {
                    PlaybackStats::bump(&self.ctx.stats.video_decode_errors, 1);
                    tracing::warn!("video frame receive failed: {e}");
                    return true;
                }
            };

            // Only the first frame of a unit carries the unit's timestamp.
            let ticks = stamped.take().or(frame.pts);
            let seconds = ticks.and_then(|t| self.time_base.to_seconds(t));
            let pts = self.estimator.next(seconds, duration);

            if !self.enqueue(&frame, pts) {
                return false;
            }
        }
    }

    fn enqueue(&mut self, frame: &VideoFrame, pts: f64) -> bool {
        let index = match self.ctx.pictures.acquire_write_slot(true) {
            Acquire::Slot(index) => index,
            _ => return false,
        };

        {
            let mut picture = self.ctx.pictures.slot(index);
            if let Err(e) = self.scaler.convert(frame, &mut picture) {
                PlaybackStats::bump(&self.ctx.stats.video_decode_errors, 1);
                tracing::warn!(pts, "video frame dropped: {e}");
                return true;
            }
            picture.pts = pts;
        }
        self.ctx.pictures.commit_write();
        PlaybackStats::bump(&self.ctx.stats.pictures_queued, 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackConfig;
    use crate::media::StreamKind;
    use crate::testing::{CopyScaler, MockAudioDecoder, MockVideoDecoder, context};
    use std::thread;
    use std::time::Duration;

    fn stream(frame_rate: Option<f64>) -> StreamInfo {
        let mut info = StreamInfo::new(1, StreamKind::Video, TimeBase::new(1, 1000));
        info.frame_rate = frame_rate;
        info
    }

    fn pipeline(ctx: &Arc<SessionContext>, frame_rate: Option<f64>) -> VideoDecodePipeline {
        VideoDecodePipeline::new(
            ctx.clone(),
            Box::new(MockVideoDecoder::new(4, 4)),
            Box::new(CopyScaler),
            &stream(frame_rate),
        )
    }

    fn read_all(ctx: &SessionContext) -> Vec<(f64, u8)> {
        let mut out = Vec::new();
        while let Acquire::Slot(i) = ctx.pictures.acquire_read_slot(false) {
            let pic = ctx.pictures.slot(i);
            out.push((pic.pts, pic.data[0]));
            drop(pic);
            ctx.pictures.commit_read();
        }
        out
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            picture_queue_capacity: 16,
            ..PlaybackConfig::default()
        }
    }

    #[test]
    fn estimator_anchors_steps_and_never_goes_back() {
        let mut est = PtsEstimator::new(None);
        assert_eq!(est.frame_duration(), 0.04);
        assert_eq!(est.next(None, None), 0.0);
        assert!((est.next(None, None) - 0.04).abs() < 1e-12);
        assert_eq!(est.next(Some(1.0), None), 1.0);
        assert!((est.next(None, Some(0.1)) - 1.1).abs() < 1e-12);
        assert!((est.next(Some(0.5), None) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn estimator_drift_is_bounded_by_missing_run() {
        // True rate 30 fps, nominal rate unknown (25 fps fallback), one stamp every 3 frames.
        let true_step = 1.0 / 30.0;
        let mut est = PtsEstimator::new(None);
        for i in 0..30 {
            let truth = i as f64 * true_step;
            let stamped = (i % 3 == 0).then_some(truth);
            let got = est.next(stamped, None);
            let run = (i % 3) as f64;
            assert!((got - truth).abs() <= run * (0.04 - true_step) + 1e-9);
        }
    }

    #[test]
    fn nominal_frame_rate_sets_the_step() {
        let mut est = PtsEstimator::new(Some(50.0));
        est.next(Some(2.0), None);
        assert!((est.next(None, None) - 2.02).abs() < 1e-12);
    }

    #[test]
    fn stamps_pictures_from_dts_then_estimates() {
        let (ctx, events) = context(config());
        ctx.video_queue
            .put(CompressedUnit::new(1, vec![10]).with_timestamps(Some(999), Some(1000)))
            .unwrap();
        ctx.video_queue.put(CompressedUnit::new(1, vec![20])).unwrap();
        ctx.video_queue
            .put(CompressedUnit::new(1, vec![30]).with_timestamps(Some(1500), None))
            .unwrap();
        ctx.video_queue.finish();

        pipeline(&ctx, Some(10.0)).run();

        let pics = read_all(&ctx);
        assert_eq!(pics.len(), 3);
        assert_eq!(pics[0], (1.0, 10));
        assert!((pics[1].0 - 1.1).abs() < 1e-12);
        assert_eq!(pics[1].1, 20);
        assert_eq!(pics[2], (1.5, 30));

        assert_eq!(ctx.pictures.acquire_read_slot(true), Acquire::Finished);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::VideoFinished);
        assert_eq!(ctx.stats.snapshot().pictures_queued, 3);
    }

    #[test]
    fn corrupt_unit_is_skipped() {
        let (ctx, _events) = context(config());
        ctx.video_queue.put(MockAudioDecoder::corrupt_unit(1)).unwrap();
        ctx.video_queue
            .put(CompressedUnit::new(1, vec![5]).with_timestamps(None, Some(40)))
            .unwrap();
        ctx.video_queue.finish();

        pipeline(&ctx, None).run();

        assert_eq!(read_all(&ctx), vec![(0.04, 5)]);
        assert_eq!(ctx.stats.snapshot().video_decode_errors, 1);
    }

    #[test]
    fn abort_stops_a_decoder_blocked_on_a_full_picture_queue() {
        let (ctx, events) = context(PlaybackConfig::default());
        for i in 0..3 {
            ctx.video_queue.put(CompressedUnit::new(1, vec![i])).unwrap();
        }
        let worker = {
            let p = pipeline(&ctx, None);
            thread::spawn(move || p.run())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ctx.pictures.len(), 1);

        ctx.request_quit();
        worker.join().unwrap();
        assert!(events.try_recv().is_err());
    }
}
