//! FFmpeg-backed demuxer plus audio and video decoders.
//!
//! Unlike the Symphonia adapter this reads any container FFmpeg understands, so sessions
//! built from it carry a video stream when the file has one. Decoded audio is handed out
//! as interleaved `f32`; decoded pictures as RGB24, RGBA or YUV420P, with every other
//! pixel format normalized to YUV420P through swscale.

use std::path::Path;

use anyhow::{Context as _, anyhow};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::software::scaling;

use crate::decoder::{Decoder, Receive};
use crate::demux::Demuxer;
use crate::error::{PlayerError, Result};
use crate::media::{
    AudioFormat, AudioFrame, CompressedUnit, PixelFormat, SampleFormat, StreamInfo, StreamKind,
    TimeBase, VideoFrame,
};
use crate::scale::pixel_to_format;

pub struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
}

// SAFETY: the format context is owned by the demuxer and used by one thread at a time
// (the opening thread, then the demux thread it is moved to).
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        ffmpeg::init().context("ffmpeg init")?;
        let input = ffmpeg::format::input(path).with_context(|| format!("open {:?}", path))?;

        let streams: Vec<StreamInfo> = input.streams().map(|s| stream_info(&s)).collect();
        if streams.is_empty() {
            return Err(anyhow!("no streams in {:?}", path));
        }

        tracing::info!(
            path = %path.display(),
            streams = streams.len(),
            audio = streams.iter().any(|s| s.kind == StreamKind::Audio),
            video = streams.iter().any(|s| s.kind == StreamKind::Video),
            "opened source"
        );
        Ok(Self { input, streams })
    }

    fn parameters(&self, index: usize) -> anyhow::Result<ffmpeg::codec::Parameters> {
        self.input
            .stream(index)
            .map(|s| s.parameters())
            .ok_or_else(|| anyhow!("no stream {index}"))
    }

    pub fn audio_decoder(&self, index: usize) -> anyhow::Result<FfmpegAudioDecoder> {
        let context = ffmpeg::codec::context::Context::from_parameters(self.parameters(index)?)
            .context("audio codec context")?;
        let decoder = context.decoder().audio().context("open audio decoder")?;
        Ok(FfmpegAudioDecoder { decoder })
    }

    pub fn video_decoder(&self, index: usize) -> anyhow::Result<FfmpegVideoDecoder> {
        let context = ffmpeg::codec::context::Context::from_parameters(self.parameters(index)?)
            .context("video codec context")?;
        let decoder = context.decoder().video().context("open video decoder")?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(anyhow!("video stream {index} has no picture size"));
        }
        Ok(FfmpegVideoDecoder {
            decoder,
            normalizer: FrameNormalizer::default(),
        })
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn read_next(&mut self) -> Result<Option<CompressedUnit>> {
        let Some((stream, packet)) = self.input.packets().next() else {
            return Ok(None);
        };
        let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
        let mut unit =
            CompressedUnit::new(stream.index(), data).with_timestamps(packet.pts(), packet.dts());
        if packet.duration() > 0 {
            unit = unit.with_duration(packet.duration());
        }
        Ok(Some(unit))
    }
}

fn stream_info(stream: &ffmpeg::format::stream::Stream<'_>) -> StreamInfo {
    let params = stream.parameters();
    let kind = match params.medium() {
        ffmpeg::media::Type::Audio => StreamKind::Audio,
        ffmpeg::media::Type::Video => StreamKind::Video,
        _ => StreamKind::Other,
    };

    // SAFETY: `params` owns a valid AVCodecParameters for the lifetime of this block.
    let (width, height, sample_rate, channels, frame_size) = unsafe {
        let ptr = params.as_ptr();
        (
            (*ptr).width,
            (*ptr).height,
            (*ptr).sample_rate,
            (*ptr).ch_layout.nb_channels,
            (*ptr).frame_size,
        )
    };

    let time_base = time_base(stream.time_base(), sample_rate);
    let mut info = StreamInfo::new(stream.index(), kind, time_base);
    info.codec = Some(params.id().name().to_uppercase());
    match kind {
        StreamKind::Audio if sample_rate > 0 && channels > 0 => {
            info.audio = Some(AudioFormat::new(
                sample_rate as u32,
                channels as usize,
                SampleFormat::F32,
            ));
            info.max_frames_per_unit = u64::try_from(frame_size).ok().filter(|&n| n > 0);
        }
        StreamKind::Video => {
            let rate = stream.avg_frame_rate();
            if rate.numerator() > 0 && rate.denominator() > 0 {
                info.frame_rate = Some(f64::from(rate));
            }
            if width > 0 && height > 0 {
                info.dimensions = Some((width as u32, height as u32));
            }
        }
        _ => {}
    }
    info
}

/// Stream time base, falling back to one tick per sample (or per second).
fn time_base(rational: ffmpeg::Rational, sample_rate: i32) -> TimeBase {
    match (
        u32::try_from(rational.numerator()),
        u32::try_from(rational.denominator()),
    ) {
        (Ok(num), Ok(den)) if num > 0 && den > 0 => TimeBase::new(num, den),
        _ if sample_rate > 0 => TimeBase::new(1, sample_rate as u32),
        _ => TimeBase::new(1, 1),
    }
}

fn packet_from_unit(unit: &CompressedUnit) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(&unit.data);
    packet.set_pts(unit.pts);
    packet.set_dts(unit.dts);
    if let Some(duration) = unit.duration {
        packet.set_duration(duration);
    }
    packet
}

fn receive_error<F>(err: ffmpeg::Error) -> Result<Receive<F>> {
    match err {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::util::error::EAGAIN => {
            Ok(Receive::WouldBlock)
        }
        ffmpeg::Error::Eof => Ok(Receive::EndOfStream),
        other => Err(PlayerError::Decode(other.to_string())),
    }
}

/// Decodes one FFmpeg audio stream into interleaved `f32` frames.
pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
}

// SAFETY: owned codec context, only driven from the render callback thread.
unsafe impl Send for FfmpegAudioDecoder {}

impl Decoder<AudioFrame> for FfmpegAudioDecoder {
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()> {
        self.decoder
            .send_packet(&packet_from_unit(unit))
            .map_err(|e| PlayerError::Decode(e.to_string()))
    }

    fn receive(&mut self) -> Result<Receive<AudioFrame>> {
        let mut frame = ffmpeg::frame::Audio::empty();
        if let Err(e) = self.decoder.receive_frame(&mut frame) {
            return receive_error(e);
        }
        let samples = interleave(&frame)?;
        let mut out = AudioFrame::new(frame.rate(), frame.channels() as usize, samples);
        out.pts = frame.timestamp();
        Ok(Receive::Frame(out))
    }
}

fn read_u8(b: &[u8]) -> f32 {
    (b[0] as f32 - 128.0) / 128.0
}

fn read_i16(b: &[u8]) -> f32 {
    i16::from_ne_bytes([b[0], b[1]]) as f32 / 32_768.0
}

fn read_i32(b: &[u8]) -> f32 {
    i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
}

fn read_f32(b: &[u8]) -> f32 {
    f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

fn read_f64(b: &[u8]) -> f32 {
    f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
}

/// Native samples of `frame` as interleaved `f32`.
fn interleave(frame: &ffmpeg::frame::Audio) -> Result<Vec<f32>> {
    let (width, read): (usize, fn(&[u8]) -> f32) = match frame.format() {
        Sample::U8(_) => (1, read_u8),
        Sample::I16(_) => (2, read_i16),
        Sample::I32(_) => (4, read_i32),
        Sample::F32(_) => (4, read_f32),
        Sample::F64(_) => (8, read_f64),
        other => {
            return Err(PlayerError::Decode(format!(
                "unsupported sample format {other:?}"
            )));
        }
    };
    let channels = frame.channels() as usize;
    let samples = frame.samples();
    let mut out = Vec::with_capacity(samples * channels);

    if frame.is_planar() {
        if channels > 8 {
            return Err(PlayerError::Decode(format!(
                "planar audio with {channels} channels"
            )));
        }
        let len = samples * width;
        let planes = (0..channels)
            .map(|ch| frame.data(ch).get(..len))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PlayerError::Decode("short audio plane".into()))?;
        for i in 0..samples {
            for plane in &planes {
                out.push(read(&plane[i * width..(i + 1) * width]));
            }
        }
    } else {
        let data = frame
            .data(0)
            .get(..samples * channels * width)
            .ok_or_else(|| PlayerError::Decode("short audio buffer".into()))?;
        out.extend(data.chunks_exact(width).map(read));
    }
    Ok(out)
}

/// Decodes one FFmpeg video stream into tightly packed pictures.
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    normalizer: FrameNormalizer,
}

// SAFETY: owned codec and swscale contexts, only driven from the video decode thread.
unsafe impl Send for FfmpegVideoDecoder {}

impl Decoder<VideoFrame> for FfmpegVideoDecoder {
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()> {
        self.decoder
            .send_packet(&packet_from_unit(unit))
            .map_err(|e| PlayerError::Decode(e.to_string()))
    }

    fn receive(&mut self) -> Result<Receive<VideoFrame>> {
        let mut frame = ffmpeg::frame::Video::empty();
        if let Err(e) = self.decoder.receive_frame(&mut frame) {
            return receive_error(e);
        }
        Ok(Receive::Frame(self.normalizer.normalize(&frame)?))
    }
}

/// Turns decoder output into a [`VideoFrame`], converting unsupported pixel formats.
#[derive(Default)]
struct FrameNormalizer {
    scaler: Option<scaling::Context>,
    converted: Option<ffmpeg::frame::Video>,
}

impl FrameNormalizer {
    fn normalize(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame> {
        let pts = frame.timestamp();
        if let Some(format) = pixel_to_format(frame.format()) {
            return Ok(pack_planes(frame, format, pts));
        }

        let (src, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = self.scaler.as_ref().is_none_or(|s| {
            let input = s.input();
            input.format != src || input.width != width || input.height != height
        });
        if stale {
            tracing::debug!(format = ?src, width, height, "converting decoded pictures to yuv420p");
            let scaler = scaling::Context::get(
                src,
                width,
                height,
                Pixel::YUV420P,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlayerError::Decode(format!("pixel conversion: {e}")))?;
            self.scaler = Some(scaler);
            self.converted = None;
        }

        let Some(scaler) = self.scaler.as_mut() else {
            return Err(PlayerError::Decode("pixel conversion unavailable".into()));
        };
        let converted = self.converted.get_or_insert_with(ffmpeg::frame::Video::empty);
        scaler
            .run(frame, converted)
            .map_err(|e| PlayerError::Decode(format!("pixel conversion: {e}")))?;
        Ok(pack_planes(converted, PixelFormat::Yuv420p, pts))
    }
}

/// Copy the strided planes of `frame` into one tightly packed buffer.
fn pack_planes(frame: &ffmpeg::frame::Video, format: PixelFormat, pts: Option<i64>) -> VideoFrame {
    let (width, height) = (frame.width(), frame.height());
    let mut data = Vec::with_capacity(format.buffer_size(width, height));
    for (plane, (row, rows)) in format.planes(width, height).into_iter().enumerate() {
        let stride = frame.stride(plane);
        let src = frame.data(plane);
        for y in 0..rows {
            data.extend_from_slice(&src[y * stride..y * stride + row]);
        }
    }
    VideoFrame {
        width,
        height,
        format,
        data,
        pts,
    }
}

#[cfg(all(test, feature = "ffmpeg"))]
mod tests {
    use super::*;
    use crate::testing::write_wav;

    #[test]
    fn reads_and_decodes_a_wav_file() {
        let path = std::env::temp_dir().join(format!("av-player-ffmpeg-{}.wav", std::process::id()));
        write_wav(&path, 8_000, 2, 4_000, 8_192);

        let mut demuxer = FfmpegDemuxer::open(&path).unwrap();
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].kind, StreamKind::Audio);
        assert_eq!(streams[0].audio, Some(AudioFormat::new(8_000, 2, SampleFormat::F32)));
        assert_eq!(streams[0].dimensions, None);

        let mut decoder = demuxer.audio_decoder(0).unwrap();
        let mut frames = 0;
        while let Some(unit) = demuxer.read_next().unwrap() {
            assert_eq!(unit.stream, 0);
            decoder.submit(&unit).unwrap();
            while let Receive::Frame(frame) = decoder.receive().unwrap() {
                assert_eq!((frame.rate, frame.channels), (8_000, 2));
                assert!(frame.samples.iter().all(|&s| (s - 0.25).abs() < 1e-3));
                frames += frame.frames();
            }
        }
        assert_eq!(frames, 4_000);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_fails_to_open() {
        let path = std::env::temp_dir().join("av-player-ffmpeg-missing.mkv");
        assert!(FfmpegDemuxer::open(&path).is_err());
    }

    #[test]
    fn supported_pixel_formats_are_packed_tightly() {
        ffmpeg::init().unwrap();
        let mut frame = ffmpeg::frame::Video::new(Pixel::RGB24, 3, 2);
        let stride = frame.stride(0);
        for y in 0..2 {
            frame.data_mut(0)[y * stride..y * stride + 9].fill(y as u8 + 1);
        }
        frame.set_pts(Some(42));

        let out = FrameNormalizer::default().normalize(&frame).unwrap();
        assert_eq!((out.width, out.height, out.format), (3, 2, PixelFormat::Rgb24));
        assert_eq!(out.data, [vec![1u8; 9], vec![2u8; 9]].concat());
    }

    #[test]
    fn other_pixel_formats_become_yuv420p() {
        ffmpeg::init().unwrap();
        let mut frame = ffmpeg::frame::Video::new(Pixel::BGR24, 4, 4);
        let stride = frame.stride(0);
        for y in 0..4 {
            frame.data_mut(0)[y * stride..y * stride + 12].fill(0);
        }

        let mut normalizer = FrameNormalizer::default();
        let out = normalizer.normalize(&frame).unwrap();
        assert_eq!(out.format, PixelFormat::Yuv420p);
        assert_eq!(out.data.len(), PixelFormat::Yuv420p.buffer_size(4, 4));
        assert!(out.data[..16].iter().all(|&y| y <= 20));

        let again = normalizer.normalize(&frame).unwrap();
        assert_eq!(again.data, out.data);
    }

    #[test]
    fn packed_i16_audio_is_scaled_to_unit_range() {
        assert_eq!(read_i16(&i16::MIN.to_ne_bytes()), -1.0);
        assert_eq!(read_u8(&[128]), 0.0);
        assert_eq!(read_f64(&0.5f64.to_ne_bytes()), 0.5);
    }
}
