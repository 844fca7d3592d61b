//! Media types exchanged between the demuxer, decoders and conversion stages.
//!
//! Payloads are opaque: nothing in the engine looks inside a [`CompressedUnit`].
//! Decoded audio is carried as interleaved `f32` regardless of the codec's native format,
//! decoded video as a packed or planar pixel buffer described by [`PixelFormat`].

/// Rational tick duration used to convert stream timestamps to seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert `ticks` to seconds. Returns `None` for a degenerate `den == 0` time base.
    pub fn to_seconds(&self, ticks: i64) -> Option<f64> {
        if self.den == 0 {
            return None;
        }
        Some(ticks as f64 * self.num as f64 / self.den as f64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Other,
}

/// Stream description reported by a demuxer at open time.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: TimeBase,
    /// Native audio layout (audio streams only, best-effort).
    pub audio: Option<AudioFormat>,
    /// Largest number of sample frames one unit decodes to, when the codec declares it.
    pub max_frames_per_unit: Option<u64>,
    /// Nominal frame rate (video streams only, best-effort).
    pub frame_rate: Option<f64>,
    /// Native picture size (video streams only, best-effort).
    pub dimensions: Option<(u32, u32)>,
    /// Codec label for logs.
    pub codec: Option<String>,
}

impl StreamInfo {
    pub fn new(index: usize, kind: StreamKind, time_base: TimeBase) -> Self {
        Self {
            index,
            kind,
            time_base,
            audio: None,
            max_frames_per_unit: None,
            frame_rate: None,
            dimensions: None,
            codec: None,
        }
    }
}

/// One demuxed, still-encoded chunk belonging to a single stream.
///
/// Timestamps and duration are expressed in the owning stream's [`TimeBase`] ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedUnit {
    pub stream: usize,
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
}

impl CompressedUnit {
    pub fn new(stream: usize, data: Vec<u8>) -> Self {
        Self {
            stream,
            data,
            pts: None,
            dts: None,
            duration: None,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Payload size in bytes; this is what the packet queue accounts for.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit, native endian.
    S16,
    /// 32-bit float, native endian.
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Interleaved PCM layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(rate: u32, channels: usize, sample_format: SampleFormat) -> Self {
        Self {
            rate,
            channels,
            sample_format,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels * self.sample_format.bytes_per_sample()
    }

    /// Playback duration of `bytes` of interleaved audio in this format.
    pub fn seconds_for_bytes(&self, bytes: usize) -> f64 {
        let per_second = self.bytes_per_frame() as f64 * self.rate as f64;
        if per_second <= 0.0 {
            return 0.0;
        }
        bytes as f64 / per_second
    }
}

/// Decoded audio: interleaved `f32` samples at the source rate and channel count.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub rate: u32,
    pub channels: usize,
    pub samples: Vec<f32>,
    pub pts: Option<i64>,
}

impl AudioFrame {
    pub fn new(rate: u32, channels: usize, samples: Vec<f32>) -> Self {
        Self {
            rate,
            channels,
            samples,
            pts: None,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    /// Planar 4:2:0: full-size Y plane followed by quarter-size U and V planes.
    Yuv420p,
}

impl PixelFormat {
    /// `(row_bytes, rows)` of each plane of a tightly packed `width`×`height` picture.
    pub fn planes(&self, width: u32, height: u32) -> Vec<(usize, usize)> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgb24 => vec![(w * 3, h)],
            PixelFormat::Rgba => vec![(w * 4, h)],
            PixelFormat::Yuv420p => {
                let chroma = (w.div_ceil(2), h.div_ceil(2));
                vec![(w, h), chroma, chroma]
            }
        }
    }

    /// Size in bytes of a tightly packed `width`×`height` picture.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        self.planes(width, height)
            .iter()
            .map(|(row, rows)| row * rows)
            .sum()
    }
}

/// Decoded video frame as produced by a decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Decoder's best-effort timestamp in stream ticks.
    pub pts: Option<i64>,
}
