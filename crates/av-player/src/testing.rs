//! Mock collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::PlaybackConfig;
use crate::decoder::{Decoder, Receive};
use crate::demux::Demuxer;
use crate::error::{PlayerError, Result};
use crate::media::{AudioFrame, CompressedUnit, PixelFormat, StreamInfo, VideoFrame};
use crate::picture_queue::Picture;
use crate::presenter::VideoSink;
use crate::scale::Scaler;
use crate::session::{SessionContext, SessionEvent};

const CORRUPT: u8 = 0xFF;

pub fn context(config: PlaybackConfig) -> (Arc<SessionContext>, Receiver<SessionEvent>) {
    SessionContext::new(config)
}

/// Yields `frames_per_unit` frames of `samples_per_frame` constant samples per submitted unit.
pub struct MockAudioDecoder {
    rate: u32,
    channels: usize,
    samples_per_frame: usize,
    frames_per_unit: usize,
    level: f32,
    pending: usize,
}

impl MockAudioDecoder {
    pub fn new(rate: u32, channels: usize, samples_per_frame: usize, frames_per_unit: usize) -> Self {
        Self {
            rate,
            channels,
            samples_per_frame,
            frames_per_unit,
            level: 0.0,
            pending: 0,
        }
    }

    pub fn with_level(mut self, level: f32) -> Self {
        self.level = level;
        self
    }

    /// A unit every mock decoder rejects.
    pub fn corrupt_unit(stream: usize) -> CompressedUnit {
        CompressedUnit::new(stream, vec![CORRUPT])
    }
}

impl Decoder<AudioFrame> for MockAudioDecoder {
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()> {
        if unit.data.first() == Some(&CORRUPT) {
            return Err(PlayerError::Decode("corrupt audio unit".into()));
        }
        self.pending += self.frames_per_unit;
        Ok(())
    }

    fn receive(&mut self) -> Result<Receive<AudioFrame>> {
        if self.pending == 0 {
            return Ok(Receive::WouldBlock);
        }
        self.pending -= 1;
        let samples = vec![self.level; self.samples_per_frame * self.channels];
        Ok(Receive::Frame(AudioFrame::new(self.rate, self.channels, samples)))
    }
}

/// One RGB24 frame per unit, every byte set to the unit's first payload byte.
pub struct MockVideoDecoder {
    width: u32,
    height: u32,
    pending: VecDeque<VideoFrame>,
}

impl MockVideoDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pending: VecDeque::new(),
        }
    }
}

impl Decoder<VideoFrame> for MockVideoDecoder {
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()> {
        let fill = unit.data.first().copied().unwrap_or(0);
        if fill == CORRUPT {
            return Err(PlayerError::Decode("corrupt video unit".into()));
        }
        self.pending.push_back(VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgb24,
            data: vec![fill; PixelFormat::Rgb24.buffer_size(self.width, self.height)],
            pts: unit.pts,
        });
        Ok(())
    }

    fn receive(&mut self) -> Result<Receive<VideoFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Receive::Frame(frame),
            None => Receive::WouldBlock,
        })
    }
}

pub struct MockDemuxer {
    streams: Vec<StreamInfo>,
    units: VecDeque<CompressedUnit>,
    endless_stream: Option<usize>,
    fail_at_end: bool,
}

impl MockDemuxer {
    pub fn new(streams: Vec<StreamInfo>, units: Vec<CompressedUnit>) -> Self {
        Self {
            streams,
            units: units.into(),
            endless_stream: None,
            fail_at_end: false,
        }
    }

    /// Never reaches end of input; every unit is a 64 KiB payload for `stream`.
    pub fn endless(streams: Vec<StreamInfo>, stream: usize) -> Self {
        Self {
            endless_stream: Some(stream),
            ..Self::new(streams, Vec::new())
        }
    }

    /// Report a read error instead of end of input once the units run out.
    pub fn fail_at_end(mut self) -> Self {
        self.fail_at_end = true;
        self
    }
}

impl Demuxer for MockDemuxer {
    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn read_next(&mut self) -> Result<Option<CompressedUnit>> {
        if let Some(stream) = self.endless_stream {
            return Ok(Some(CompressedUnit::new(stream, vec![0; 64 * 1024])));
        }
        match self.units.pop_front() {
            Some(unit) => Ok(Some(unit)),
            None if self.fail_at_end => Err(PlayerError::Demux("truncated input".into())),
            None => Ok(None),
        }
    }
}

/// Records the timestamp of every presented picture.
#[derive(Default)]
pub struct RecordingSink {
    pub shown: Vec<f64>,
    pub first_pixels: Vec<u8>,
}

impl VideoSink for RecordingSink {
    fn present(&mut self, picture: &Picture) -> Result<()> {
        self.shown.push(picture.pts);
        self.first_pixels.push(picture.data.first().copied().unwrap_or(0));
        Ok(())
    }
}

/// Copies the frame through unchanged; keeps the decoder's fill byte visible to sinks.
pub struct CopyScaler;

impl Scaler for CopyScaler {
    fn convert(&mut self, frame: &VideoFrame, dst: &mut Picture) -> Result<()> {
        dst.data.clear();
        dst.data.extend_from_slice(&frame.data);
        dst.width = frame.width;
        dst.height = frame.height;
        dst.format = frame.format;
        Ok(())
    }
}

/// Minimal 16-bit PCM WAV with a constant sample value.
pub fn write_wav(path: &Path, rate: u32, channels: u16, frames: u32, value: i16) {
    let data_len = frames * channels as u32 * 2;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * channels as u32 * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for _ in 0..(frames * channels as u32) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}
