//! Audio conversion to the device format.
//!
//! The [`Resampler`] trait is what the audio decode pipeline talks to. [`RubatoResampler`]
//! implements it with Rubato's asynchronous sinc resampler, mapping channels first and
//! encoding to the target sample format last. Input that does not fill a whole resampler
//! chunk, and output that did not fit the caller's budget, stay buffered inside the
//! context; [`Resampler::delay`] reports both in source-rate samples so callers can size
//! their output with [`needed_samples`]. At end of input [`Resampler::flush`] pushes the
//! partial chunk and the filter tail through, so the total output length is the input
//! length at the target rate.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler as RubatoProcess, SincInterpolationParameters,
    SincInterpolationType, WindowFunction, calculate_cutoff,
};

use crate::error::{PlayerError, Result};
use crate::media::{AudioFormat, AudioFrame, SampleFormat};

/// Long-lived conversion state for one source format.
pub trait Resampler: Send {
    /// `(rate, channels)` of the input this context was built for.
    fn source(&self) -> (u32, usize);

    fn target(&self) -> AudioFormat;

    /// Samples (per channel, at the source rate) accepted but not yet emitted.
    fn delay(&self) -> u64;

    /// Converted samples per channel waiting for output budget.
    fn ready(&self) -> usize;

    /// Convert `frame`, appending at most `max_samples` per channel to `out` as
    /// target-format interleaved bytes. Returns the number of samples per channel written.
    fn convert(&mut self, frame: &AudioFrame, max_samples: usize, out: &mut Vec<u8>)
    -> Result<usize>;

    /// Append at most `max_samples` per channel of already converted output to `out`.
    fn drain(&mut self, max_samples: usize, out: &mut Vec<u8>) -> usize;

    /// End of input: push buffered input and the filter tail through, then drain like
    /// [`Resampler::drain`]. Once everything has been emitted this returns 0.
    fn flush(&mut self, max_samples: usize, out: &mut Vec<u8>) -> Result<usize>;
}

/// Builds a resampler for a newly seen source `(rate, channels)`.
pub type ResamplerFactory =
    Box<dyn FnMut(u32, usize, AudioFormat) -> Result<Box<dyn Resampler>> + Send>;

/// Output samples per channel that converting `frame_samples` more input can produce.
///
/// `ceil((delay + frame_samples) * target_rate / source_rate)`.
pub fn needed_samples(delay: u64, frame_samples: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    let total = (delay as u128 + frame_samples as u128) * target_rate as u128;
    total.div_ceil(source_rate as u128) as usize
}

/// Configuration for [`RubatoResampler`].
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    pub source_rate: u32,
    /// Channel count of incoming frames.
    pub in_channels: usize,
    /// Output format; its channel count is independent of `in_channels`.
    pub target: AudioFormat,
    /// Input chunk size in frames for the sinc resampler.
    pub chunk_frames: usize,
}

impl ResampleConfig {
    /// Configuration that keeps the source channel count on the output side.
    pub fn symmetric(source_rate: u32, channels: usize, target: AudioFormat, chunk_frames: usize) -> Self {
        Self {
            source_rate,
            in_channels: channels,
            target: AudioFormat { channels, ..target },
            chunk_frames,
        }
    }
}

pub struct RubatoResampler {
    cfg: ResampleConfig,
    ratio: f64,
    /// `None` when source and target rates match.
    sinc: Option<Async<f32>>,
    chunk_frames: usize,
    pending_in: Vec<f32>,
    pending_out: Vec<f32>,
    scratch: Vec<f32>,
    indexing: Indexing,
    /// Source frames accepted so far.
    frames_in: u64,
    /// Frames the sinc stage has produced so far.
    frames_out: u64,
}

impl RubatoResampler {
    pub fn new(cfg: ResampleConfig) -> Result<Self> {
        if cfg.source_rate == 0 || cfg.target.rate == 0 {
            return Err(PlayerError::ResourceUnavailable(
                "resampler needs non-zero sample rates".into(),
            ));
        }
        if cfg.in_channels == 0 || cfg.target.channels == 0 {
            return Err(PlayerError::ResourceUnavailable(
                "resampler needs at least one channel".into(),
            ));
        }

        let out_channels = cfg.target.channels;
        let ratio = cfg.target.rate as f64 / cfg.source_rate as f64;
        let chunk_frames = cfg.chunk_frames.max(1);

        let sinc = if cfg.source_rate == cfg.target.rate {
            None
        } else {
            let sinc_len = 128;
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: calculate_cutoff(sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window,
            };
            let sinc = Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk_frames,
                out_channels,
                FixedAsync::Input,
            )
            .map_err(|e| PlayerError::ResourceUnavailable(format!("resampler init: {e}")))?;
            Some(sinc)
        };

        let out_capacity_frames = ((chunk_frames as f64 * ratio * 1.1).ceil() as usize + 64)
            .max(chunk_frames * 3);

        tracing::debug!(
            from_hz = cfg.source_rate,
            to_hz = cfg.target.rate,
            in_channels = cfg.in_channels,
            out_channels,
            "resampler created"
        );

        Ok(Self {
            cfg,
            ratio,
            sinc,
            chunk_frames,
            pending_in: Vec::new(),
            pending_out: Vec::new(),
            scratch: vec![0.0; out_capacity_frames * out_channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Boxed factory suitable for the audio decode pipeline.
    pub fn factory(chunk_frames: usize) -> ResamplerFactory {
        Box::new(move |rate, channels, target| {
            let cfg = ResampleConfig {
                source_rate: rate,
                in_channels: channels,
                target,
                chunk_frames,
            };
            Ok(Box::new(RubatoResampler::new(cfg)?) as Box<dyn Resampler>)
        })
    }

    fn out_channels(&self) -> usize {
        self.cfg.target.channels
    }

    /// Run every whole chunk buffered in `pending_in` through the sinc resampler.
    fn process_pending(&mut self) -> Result<()> {
        let channels = self.out_channels();
        if self.sinc.is_none() {
            self.frames_out += (self.pending_in.len() / channels) as u64;
            self.pending_out.append(&mut self.pending_in);
            return Ok(());
        }

        let chunk_samples = self.chunk_frames * channels;
        let mut pending = std::mem::take(&mut self.pending_in);
        let mut consumed = 0;
        let mut result = Ok(());
        while pending.len() - consumed >= chunk_samples {
            result = self.process_chunk(&pending[consumed..consumed + chunk_samples], None);
            if result.is_err() {
                break;
            }
            consumed += chunk_samples;
        }
        pending.drain(..consumed);
        self.pending_in = pending;
        result
    }

    /// One `process_into_buffer` call; `partial` marks a zero-padded short chunk.
    fn process_chunk(&mut self, input: &[f32], partial: Option<usize>) -> Result<()> {
        let channels = self.out_channels();
        let Some(sinc) = self.sinc.as_mut() else {
            return Ok(());
        };
        let in_frames = input.len() / channels;
        let input_adapter = InterleavedSlice::new(input, channels, in_frames)
            .map_err(|e| PlayerError::Decode(format!("resampler input: {e}")))?;

        let out_capacity_frames = self.scratch.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, channels, out_capacity_frames)
                .map_err(|e| PlayerError::Decode(format!("resampler output: {e}")))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = sinc
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| PlayerError::Decode(format!("resampler process: {e}")))?;

        self.pending_out
            .extend_from_slice(&self.scratch[..nbr_out * channels]);
        self.frames_out += nbr_out as u64;
        Ok(())
    }

    /// Output frames the input accepted so far should turn into.
    fn expected_frames_out(&self) -> u64 {
        (self.frames_in as u128 * self.cfg.target.rate as u128)
            .div_ceil(self.cfg.source_rate as u128) as u64
    }

    /// Process the partial chunk, then zero chunks until the output length matches the
    /// input length at the target rate. Overshoot is cut from the end.
    fn flush_tail(&mut self) -> Result<()> {
        let channels = self.out_channels();
        if self.sinc.is_none() {
            return self.process_pending();
        }

        let tail_frames = self.pending_in.len() / channels;
        if tail_frames > 0 {
            let tail = std::mem::take(&mut self.pending_in);
            self.process_chunk(&tail, Some(tail_frames))?;
        }

        let target = self.expected_frames_out();
        if self.frames_out < target {
            let step = ((self.chunk_frames as f64 * self.ratio) as u64).max(1);
            let mut budget = (target - self.frames_out).div_ceil(step) + 4;
            let silence = vec![0.0; self.chunk_frames * channels];
            while self.frames_out < target && budget > 0 {
                self.process_chunk(&silence, None)?;
                budget -= 1;
            }
            if self.frames_out < target {
                tracing::warn!(
                    missing_frames = target - self.frames_out,
                    "resampler tail shorter than expected"
                );
            }
        }

        if self.frames_out > target {
            let excess = (self.frames_out - target) as usize * channels;
            let keep = self.pending_out.len().saturating_sub(excess);
            self.pending_out.truncate(keep);
            self.frames_out = target;
        }
        Ok(())
    }
}

impl Resampler for RubatoResampler {
    fn source(&self) -> (u32, usize) {
        (self.cfg.source_rate, self.cfg.in_channels)
    }

    fn target(&self) -> AudioFormat {
        self.cfg.target
    }

    fn delay(&self) -> u64 {
        let channels = self.out_channels();
        let in_frames = (self.pending_in.len() / channels) as f64;
        let out_frames = (self.pending_out.len() / channels) as f64;
        (in_frames + out_frames / self.ratio).ceil() as u64
    }

    fn convert(
        &mut self,
        frame: &AudioFrame,
        max_samples: usize,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        if frame.channels != self.cfg.in_channels || frame.rate != self.cfg.source_rate {
            return Err(PlayerError::Decode(format!(
                "frame {}Hz/{}ch does not match resampler {}Hz/{}ch",
                frame.rate, frame.channels, self.cfg.source_rate, self.cfg.in_channels
            )));
        }

        map_channels(
            &frame.samples,
            self.cfg.in_channels,
            self.out_channels(),
            &mut self.pending_in,
        );
        self.frames_in += frame.frames() as u64;
        self.process_pending()?;
        Ok(self.drain(max_samples, out))
    }

    fn ready(&self) -> usize {
        self.pending_out.len() / self.out_channels()
    }

    fn drain(&mut self, max_samples: usize, out: &mut Vec<u8>) -> usize {
        let channels = self.out_channels();
        let emit_frames = (self.pending_out.len() / channels).min(max_samples);
        let emit = emit_frames * channels;
        encode_samples(&self.pending_out[..emit], self.cfg.target.sample_format, out);
        self.pending_out.drain(..emit);
        emit_frames
    }

    fn flush(&mut self, max_samples: usize, out: &mut Vec<u8>) -> Result<usize> {
        self.flush_tail()?;
        Ok(self.drain(max_samples, out))
    }
}

/// Append `src` (interleaved, `src_channels`) to `dst` with `dst_channels`.
///
/// Mapping rules:
/// - equal counts: pass-through
/// - mono → N: duplicate channel 0
/// - N → mono: average all channels
/// - otherwise: copy shared channels, fill extra output channels from the last input one
pub fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize, dst: &mut Vec<f32>) {
    if src_channels == 0 || dst_channels == 0 {
        return;
    }
    if src_channels == dst_channels {
        dst.extend_from_slice(src);
        return;
    }
    for frame in src.chunks_exact(src_channels) {
        if dst_channels == 1 {
            let sum: f32 = frame.iter().sum();
            dst.push(sum / src_channels as f32);
            continue;
        }
        for ch in 0..dst_channels {
            dst.push(frame[ch.min(src_channels - 1)]);
        }
    }
}

/// Encode `f32` samples into interleaved bytes of `format` (native endian).
pub fn encode_samples(samples: &[f32], format: SampleFormat, out: &mut Vec<u8>) {
    out.reserve(samples.len() * format.bytes_per_sample());
    match format {
        SampleFormat::S16 => {
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                out.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for s in samples {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_stereo(rate: u32) -> AudioFormat {
        AudioFormat::new(rate, 2, SampleFormat::S16)
    }

    #[test]
    fn needed_samples_rounds_up() {
        assert_eq!(needed_samples(0, 1024, 48_000, 48_000), 1024);
        assert_eq!(needed_samples(0, 1024, 44_100, 48_000), 1115);
        assert_eq!(needed_samples(16, 1024, 44_100, 48_000), 1132);
        assert_eq!(needed_samples(0, 1, 48_000, 8_000), 1);
        assert_eq!(needed_samples(5, 5, 0, 48_000), 0);
    }

    #[test]
    fn map_channels_mono_to_stereo_duplicates() {
        let mut out = Vec::new();
        map_channels(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn map_channels_stereo_to_mono_averages() {
        let mut out = Vec::new();
        map_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1, &mut out);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn map_channels_surround_to_stereo_keeps_front_pair() {
        let mut out = Vec::new();
        map_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn encode_s16_clamps_and_scales() {
        let mut out = Vec::new();
        encode_samples(&[1.5, -1.0, 0.0], SampleFormat::S16, &mut out);
        assert_eq!(out.len(), 6);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_ne_bytes([out[2], out[3]]), -i16::MAX);
        assert_eq!(i16::from_ne_bytes([out[4], out[5]]), 0);
    }

    #[test]
    fn same_rate_symmetric_passes_through() {
        let cfg = ResampleConfig::symmetric(48_000, 2, s16_stereo(48_000), 256);
        let mut rs = RubatoResampler::new(cfg).unwrap();
        let frame = AudioFrame::new(48_000, 2, vec![0.0; 2 * 100]);
        let mut out = Vec::new();
        let produced = rs.convert(&frame, 100, &mut out).unwrap();
        assert_eq!(produced, 100);
        assert_eq!(out.len(), 100 * 4);
        assert_eq!(rs.delay(), 0);
    }

    #[test]
    fn output_budget_keeps_remainder_as_delay() {
        let cfg = ResampleConfig::symmetric(48_000, 1, s16_stereo(48_000), 256);
        let mut rs = RubatoResampler::new(cfg).unwrap();
        let frame = AudioFrame::new(48_000, 1, vec![0.0; 100]);
        let mut out = Vec::new();
        assert_eq!(rs.convert(&frame, 60, &mut out).unwrap(), 60);
        assert_eq!(rs.delay(), 40);
        out.clear();
        let empty = AudioFrame::new(48_000, 1, Vec::new());
        assert_eq!(rs.convert(&empty, 100, &mut out).unwrap(), 40);
        assert_eq!(rs.delay(), 0);
    }

    #[test]
    fn independent_channel_counts_convert_mono_to_stereo() {
        let cfg = ResampleConfig {
            source_rate: 44_100,
            in_channels: 1,
            target: s16_stereo(48_000),
            chunk_frames: 256,
        };
        let mut rs = RubatoResampler::new(cfg).unwrap();
        assert_eq!(rs.source(), (44_100, 1));
        let mut total = 0;
        for _ in 0..8 {
            let frame = AudioFrame::new(44_100, 1, vec![0.0; 256]);
            let budget = needed_samples(rs.delay(), frame.frames(), 44_100, 48_000);
            let mut out = Vec::new();
            let produced = rs.convert(&frame, budget, &mut out).unwrap();
            assert!(produced <= budget);
            assert_eq!(out.len(), produced * 2 * 2);
            total += produced;
        }
        assert!(total > 0);
        assert!(total <= needed_samples(0, 8 * 256, 44_100, 48_000));
    }

    #[test]
    fn flush_emits_the_tail_at_the_target_rate() {
        let target = AudioFormat::new(48_000, 1, SampleFormat::F32);
        let cfg = ResampleConfig::symmetric(44_100, 1, target, 1024);
        let mut rs = RubatoResampler::new(cfg).unwrap();
        let mut total = 0;
        for _ in 0..20 {
            let frame = AudioFrame::new(44_100, 1, vec![0.25; 441]);
            let budget = needed_samples(rs.delay(), frame.frames(), 44_100, 48_000);
            total += rs.convert(&frame, budget, &mut Vec::new()).unwrap();
        }
        assert!(total < 9_600);

        let mut out = Vec::new();
        loop {
            let n = rs.flush(512, &mut out).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 512);
            total += n;
        }
        assert_eq!(total, 9_600);
        assert_eq!(rs.ready(), 0);
        assert_eq!(rs.flush(512, &mut out).unwrap(), 0);
    }

    #[test]
    fn same_rate_flush_returns_held_output() {
        let cfg = ResampleConfig::symmetric(48_000, 2, s16_stereo(48_000), 256);
        let mut rs = RubatoResampler::new(cfg).unwrap();
        let frame = AudioFrame::new(48_000, 2, vec![0.0; 2 * 50]);
        assert_eq!(rs.convert(&frame, 20, &mut Vec::new()).unwrap(), 20);
        assert_eq!(rs.ready(), 30);
        let mut out = Vec::new();
        assert_eq!(rs.drain(10, &mut out), 10);
        assert_eq!(out.len(), 10 * 4);
        assert_eq!(rs.flush(100, &mut out).unwrap(), 20);
        assert_eq!(rs.flush(100, &mut out).unwrap(), 0);
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let cfg = ResampleConfig::symmetric(48_000, 2, s16_stereo(48_000), 256);
        let mut rs = RubatoResampler::new(cfg).unwrap();
        let frame = AudioFrame::new(44_100, 2, vec![0.0; 4]);
        let err = rs.convert(&frame, 10, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let cfg = ResampleConfig::symmetric(0, 2, s16_stereo(48_000), 256);
        assert!(RubatoResampler::new(cfg).is_err());
    }
}
