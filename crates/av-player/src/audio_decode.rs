//! Audio decode pipeline.
//!
//! Driven on demand by the render bridge: each [`AudioDecodePipeline::decode_batch`] call
//! takes one compressed unit from the audio packet queue (blocking), drains every frame
//! the decoder produces for it, resamples those frames to the session's target format
//! and advances the audio clock by the duration of the bytes written.
//!
//! Converted audio that does not fit the caller's buffer stays in the resampler and is
//! handed out before the next unit is taken. Once the queue is drained the resampler's
//! buffered input and filter tail are flushed, so the last batches cover all the input.

use std::sync::Arc;

use crate::decoder::{Decoder, Receive};
use crate::error::{PlayerError, Result};
use crate::media::{AudioFormat, AudioFrame, StreamInfo, TimeBase};
use crate::packet_queue::Get;
use crate::resample::{Resampler, ResamplerFactory, needed_samples};
use crate::session::SessionContext;
use crate::stats::PlaybackStats;

pub struct AudioDecodePipeline {
    ctx: Arc<SessionContext>,
    decoder: Box<dyn Decoder<AudioFrame>>,
    time_base: TimeBase,
    target: AudioFormat,
    /// Bytes one unit of the stream can convert to, when the stream declares its layout.
    unit_bytes_hint: Option<usize>,
    factory: ResamplerFactory,
    resampler: Option<Box<dyn Resampler>>,
    converted: Vec<u8>,
}

impl AudioDecodePipeline {
    pub fn new(
        ctx: Arc<SessionContext>,
        decoder: Box<dyn Decoder<AudioFrame>>,
        stream: &StreamInfo,
        factory: ResamplerFactory,
    ) -> Self {
        let target = ctx.config.audio_target;
        let unit_bytes_hint = match (stream.audio, stream.max_frames_per_unit) {
            (Some(native), Some(frames)) if native.rate > 0 => {
                let held = ctx.config.chunk_frames as u64;
                let samples = needed_samples(held, frames as usize, native.rate, target.rate);
                Some(samples * target.bytes_per_frame())
            }
            _ => None,
        };
        Self {
            ctx,
            decoder,
            time_base: stream.time_base,
            target,
            unit_bytes_hint,
            factory,
            resampler: None,
            converted: Vec::new(),
        }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Buffer size that lets the largest unit of the stream convert in one batch.
    pub fn max_batch_bytes(&self) -> Option<usize> {
        self.unit_bytes_hint
    }

    /// Decode one unit into `out` and return the number of bytes written.
    ///
    /// - `Ok(0)`: the unit produced no audio, or the queue is finished and everything
    ///   buffered has been handed out.
    /// - `Err(PlayerError::QueueAborted)`: quit was raised.
    /// - `Err(PlayerError::Decode)`: the decoder rejected the unit; the next call carries on
    ///   with the following unit.
    ///
    /// At most `out.len()` bytes are written; whatever does not fit is returned by the
    /// following calls before another unit is decoded.
    pub fn decode_batch(&mut self, out: &mut [u8]) -> Result<usize> {
        let bytes_per_frame = self.target.bytes_per_frame();
        let capacity = out.len() / bytes_per_frame;

        if let Some(resampler) = self.resampler.as_mut()
            && resampler.ready() > 0
        {
            self.converted.clear();
            resampler.drain(capacity, &mut self.converted);
            return Ok(self.emit(out, 0));
        }

        let unit = match self.ctx.audio_queue.get(true) {
            Get::Unit(unit) => unit,
            Get::Empty => return self.flush(out),
            Get::Aborted => return Err(PlayerError::QueueAborted),
        };

        if let Err(e) = self.decoder.submit(&unit) {
            PlaybackStats::bump(&self.ctx.stats.audio_decode_errors, 1);
            return Err(e);
        }

        if let Some(pts) = unit.pts.and_then(|t| self.time_base.to_seconds(t)) {
            self.ctx.clocks.audio.set(pts);
        }

        let mut written = 0usize;
        loop {
            let frame = match self.decoder.receive() {
                Ok(Receive::Frame(frame)) => frame,
                Ok(Receive::WouldBlock) | Ok(Receive::EndOfStream) => break,
                Err(e) => {
                    PlaybackStats::bump(&self.ctx.stats.audio_decode_errors, 1);
                    tracing::warn!("audio frame receive failed: {e}");
                    break;
                }
            };
            let room = (out.len() - written) / bytes_per_frame;
            if let Err(e) = self.convert_frame(&frame, room) {
                PlaybackStats::bump(&self.ctx.stats.audio_decode_errors, 1);
                tracing::warn!("audio frame skipped: {e}");
                continue;
            }
            written += self.copy_converted(out, written);
        }

        self.ctx
            .clocks
            .audio
            .advance(self.target.seconds_for_bytes(written));
        Ok(written)
    }

    /// End of input: hand out what the resampler still holds.
    fn flush(&mut self, out: &mut [u8]) -> Result<usize> {
        let capacity = out.len() / self.target.bytes_per_frame();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(0);
        };
        self.converted.clear();
        let frames = resampler.flush(capacity, &mut self.converted)?;
        if frames > 0 {
            tracing::trace!(frames, "resampler tail flushed");
        }
        Ok(self.emit(out, 0))
    }

    /// Copy `self.converted` into `out` at `at` and advance the clock by it.
    fn emit(&mut self, out: &mut [u8], at: usize) -> usize {
        let n = self.copy_converted(out, at);
        self.ctx
            .clocks
            .audio
            .advance(self.target.seconds_for_bytes(n));
        n
    }

    fn copy_converted(&self, out: &mut [u8], at: usize) -> usize {
        let bytes = self.converted.len();
        let remaining = out.len() - at;
        assert!(
            bytes <= remaining,
            "audio batch overflow: {bytes} converted bytes, {remaining} bytes of capacity left"
        );
        out[at..at + bytes].copy_from_slice(&self.converted);
        bytes
    }

    /// Resample `frame` into `self.converted`, emitting at most `room` samples per channel
    /// and rebuilding the resampler if the source format changed.
    fn convert_frame(&mut self, frame: &AudioFrame, room: usize) -> Result<()> {
        self.converted.clear();
        if frame.frames() == 0 {
            return Ok(());
        }

        let source = (frame.rate, frame.channels);
        let stale = self
            .resampler
            .as_ref()
            .map(|r| r.source() != source)
            .unwrap_or(true);
        if stale {
            if let Some(old) = self.resampler.as_ref() {
                tracing::info!(
                    rate_hz = frame.rate,
                    channels = frame.channels,
                    dropped_samples = old.ready(),
                    "audio source format changed; rebuilding resampler"
                );
            }
            self.resampler = Some((self.factory)(frame.rate, frame.channels, self.target)?);
        }

        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let max_samples = needed_samples(
            resampler.delay(),
            frame.frames(),
            frame.rate,
            self.target.rate,
        )
        .min(room);
        resampler.convert(frame, max_samples, &mut self.converted)?;
        Ok(())
    }
}
