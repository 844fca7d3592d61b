//! Symphonia-backed demuxer and audio decoder.
//!
//! Symphonia only reads audio containers, so every stream reported here is either audio
//! or [`StreamKind::Other`]; sessions built from it play audio only.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::decoder::{Decoder, Receive};
use crate::demux::Demuxer;
use crate::error::{PlayerError, Result};
use crate::media::{
    AudioFormat, AudioFrame, CompressedUnit, SampleFormat, StreamInfo, StreamKind, TimeBase,
};

pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    /// Symphonia track id for each entry of `streams`.
    track_ids: Vec<u32>,
    params: Vec<CodecParameters>,
}

impl SymphoniaDemuxer {
    /// Open `path`, detect its container and list its tracks.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("detect format of {:?}", path))?;

        let format = detected.format;
        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        let mut params = Vec::new();
        for (index, track) in format.tracks().iter().enumerate() {
            streams.push(stream_info(index, &track.codec_params));
            track_ids.push(track.id);
            params.push(track.codec_params.clone());
        }
        if streams.is_empty() {
            return Err(anyhow!("no tracks in {:?}", path));
        }

        tracing::info!(
            path = %path.display(),
            tracks = streams.len(),
            codec = streams.iter().find_map(|s| s.codec.clone()).as_deref().unwrap_or("unknown"),
            "opened source"
        );
        Ok(Self {
            format,
            streams,
            track_ids,
            params,
        })
    }

    /// Decoder for the stream at `index` (an index into [`Demuxer::streams`]).
    pub fn audio_decoder(&self, index: usize) -> anyhow::Result<SymphoniaAudioDecoder> {
        let params = self
            .params
            .get(index)
            .ok_or_else(|| anyhow!("no stream {index}"))?;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .context("create audio decoder")?;
        Ok(SymphoniaAudioDecoder {
            decoder,
            track_id: self.track_ids[index],
            pending: VecDeque::new(),
        })
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn read_next(&mut self) -> Result<Option<CompressedUnit>> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::warn!("track list changed mid-stream; stopping");
                return Ok(None);
            }
            Err(e) => return Err(PlayerError::Demux(e.to_string())),
        };

        let stream = self
            .track_ids
            .iter()
            .position(|&id| id == packet.track_id())
            .unwrap_or(usize::MAX);
        let ts = i64::try_from(packet.ts()).ok();
        let mut unit = CompressedUnit::new(stream, packet.buf().to_vec()).with_timestamps(ts, ts);
        if let Ok(dur) = i64::try_from(packet.dur()) {
            unit = unit.with_duration(dur);
        }
        Ok(Some(unit))
    }
}

/// Decodes one Symphonia audio track into interleaved `f32` frames.
pub struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    pending: VecDeque<AudioFrame>,
}

impl Decoder<AudioFrame> for SymphoniaAudioDecoder {
    fn submit(&mut self, unit: &CompressedUnit) -> Result<()> {
        let ts = unit.pts.and_then(|t| u64::try_from(t).ok()).unwrap_or(0);
        let dur = unit.duration.and_then(|d| u64::try_from(d).ok()).unwrap_or(0);
        let packet = Packet::new_from_slice(self.track_id, ts, dur, &unit.data);

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => return Err(PlayerError::Decode(e.to_string())),
        };
        if decoded.frames() == 0 {
            return Ok(());
        }

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let mut frame = AudioFrame::new(spec.rate, spec.channels.count(), sample_buf.samples().to_vec());
        frame.pts = unit.pts;
        self.pending.push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Receive<AudioFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Receive::Frame(frame),
            None => Receive::WouldBlock,
        })
    }
}

fn stream_info(index: usize, params: &CodecParameters) -> StreamInfo {
    let kind = if params.sample_rate.is_some() {
        StreamKind::Audio
    } else {
        StreamKind::Other
    };
    let mut info = StreamInfo::new(index, kind, time_base_from_params(params));
    info.codec = codec_name_from_params(params);
    if let (Some(rate), Some(channels)) = (params.sample_rate, params.channels) {
        info.audio = Some(AudioFormat::new(rate, channels.count(), SampleFormat::F32));
    }
    info.max_frames_per_unit = params.max_frames_per_packet;
    info
}

/// Track time base, falling back to one tick per sample.
fn time_base_from_params(params: &CodecParameters) -> TimeBase {
    match (params.time_base, params.sample_rate) {
        (Some(tb), _) => TimeBase::new(tb.numer, tb.denom),
        (None, Some(rate)) => TimeBase::new(1, rate),
        (None, None) => TimeBase::new(1, 1),
    }
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
