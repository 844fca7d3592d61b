//! Audio render bridge.
//!
//! The audio device pulls bytes; the bridge answers every request with exactly the
//! requested length. It keeps one working buffer per session, refilled batch by batch from
//! the [`AudioDecodePipeline`], and mixes from it into the zeroed device buffer.
//!
//! A failed batch is replaced by a short run of silence so the device never starves and
//! the callback never spins. The same happens once the audio input is exhausted.

use std::sync::Arc;

use crate::audio_decode::AudioDecodePipeline;
use crate::media::{AudioFormat, SampleFormat};
use crate::session::{SessionContext, SessionEvent};
use crate::stats::PlaybackStats;

pub struct AudioRenderBridge {
    ctx: Arc<SessionContext>,
    pipeline: AudioDecodePipeline,
    format: AudioFormat,
    buffer: Vec<u8>,
    /// Read position inside `buffer`.
    offset: usize,
    /// Bytes of `buffer` holding audio (decoded or silence).
    valid: usize,
    silence_len: usize,
    /// Currently emitting substituted silence because of failures.
    underrun: bool,
}

impl AudioRenderBridge {
    pub fn new(ctx: Arc<SessionContext>, pipeline: AudioDecodePipeline) -> Self {
        let format = pipeline.target();
        let buffer_len = ctx
            .config
            .audio_buffer_bytes
            .max(pipeline.max_batch_bytes().unwrap_or(0))
            .max(format.bytes_per_frame());
        if buffer_len > ctx.config.audio_buffer_bytes {
            tracing::debug!(
                configured = ctx.config.audio_buffer_bytes,
                buffer_len,
                "render buffer grown to fit one unit"
            );
        }
        let silence_len = aligned_silence(ctx.config.silence_bytes, buffer_len, format);
        Self {
            ctx,
            pipeline,
            format,
            buffer: vec![0; buffer_len],
            offset: 0,
            valid: 0,
            silence_len,
            underrun: false,
        }
    }

    /// Format of the bytes written by [`AudioRenderBridge::fill`].
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Fill all of `out` with audio in [`AudioRenderBridge::format`].
    ///
    /// Blocks only while the audio packet queue is empty and its producer still running.
    pub fn fill(&mut self, out: &mut [u8]) {
        out.fill(0);
        let mut pos = 0;
        while pos < out.len() {
            if self.offset >= self.valid {
                self.refill();
                continue;
            }
            let n = (self.valid - self.offset).min(out.len() - pos);
            mix(
                &mut out[pos..pos + n],
                &self.buffer[self.offset..self.offset + n],
                self.format.sample_format,
            );
            pos += n;
            self.offset += n;
        }
    }

    fn refill(&mut self) {
        self.offset = 0;
        self.valid = 0;

        match self.pipeline.decode_batch(&mut self.buffer) {
            Ok(0) => {
                // A unit that decoded to nothing leaves the next call to try again. Zero
                // after the queue drained means the resampler tail is out as well.
                if self.ctx.audio_queue.is_drained() {
                    if self.ctx.mark_audio_drained() {
                        tracing::info!("audio input drained; playing silence");
                        self.ctx.emit(SessionEvent::AudioDrained);
                    }
                    self.insert_silence();
                }
            }
            Ok(n) => {
                if self.underrun {
                    tracing::info!("audio resumed after underrun");
                    self.underrun = false;
                }
                PlaybackStats::bump(&self.ctx.stats.audio_batches, 1);
                PlaybackStats::bump(&self.ctx.stats.audio_bytes, n as u64);
                self.valid = n;
            }
            Err(e) if e.is_abort() => self.insert_silence(),
            Err(e) => {
                if !self.underrun {
                    tracing::warn!("audio underrun, substituting silence: {e}");
                    self.underrun = true;
                }
                PlaybackStats::bump(&self.ctx.stats.underrun_events, 1);
                self.insert_silence();
            }
        }
    }

    fn insert_silence(&mut self) {
        self.buffer[..self.silence_len].fill(0);
        self.valid = self.silence_len;
        PlaybackStats::bump(&self.ctx.stats.silence_bytes, self.silence_len as u64);
    }
}

/// Silence run length: a whole number of frames, at least one, at most the buffer.
fn aligned_silence(requested: usize, buffer_len: usize, format: AudioFormat) -> usize {
    let frame = format.bytes_per_frame().max(1);
    let len = requested.min(buffer_len) / frame * frame;
    len.max(frame).min(buffer_len)
}

/// Add `src` into `dst` at unity gain.
fn mix(dst: &mut [u8], src: &[u8], format: SampleFormat) {
    match format {
        SampleFormat::S16 => {
            let mut d = dst.chunks_exact_mut(2);
            for (d, s) in (&mut d).zip(src.chunks_exact(2)) {
                let a = i16::from_ne_bytes([d[0], d[1]]);
                let b = i16::from_ne_bytes([s[0], s[1]]);
                d.copy_from_slice(&a.saturating_add(b).to_ne_bytes());
            }
            copy_tail(d.into_remainder(), src);
        }
        SampleFormat::F32 => {
            let mut d = dst.chunks_exact_mut(4);
            for (d, s) in (&mut d).zip(src.chunks_exact(4)) {
                let a = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let b = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
                d.copy_from_slice(&(a + b).to_ne_bytes());
            }
            copy_tail(d.into_remainder(), src);
        }
    }
}

/// A request can end mid-sample; the partial bytes are copied as-is.
fn copy_tail(dst_tail: &mut [u8], src: &[u8]) {
    if dst_tail.is_empty() {
        return;
    }
    let start = src.len() - dst_tail.len();
    dst_tail.copy_from_slice(&src[start..]);
}
