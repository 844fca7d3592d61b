//! Playback runtime: device setup, session wiring and the main wait loop.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, select};

use av_player::config::PlaybackConfig;
use av_player::demux::{self, Demuxer};
use av_player::device;
use av_player::output;
use av_player::ppm::PpmSink;
use av_player::resample::RubatoResampler;
use av_player::session::{Session, SessionEvent, SessionParts};

/// Lets the device play out what the bridge already handed over after input ends.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub playback: PlaybackConfig,
    /// Directory presented pictures are written to; `None` skips video.
    pub frames_dir: Option<PathBuf>,
    pub max_frames: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Play `config.path` on the selected device until it ends or Ctrl-C.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let host = cpal::default_host();
    let device_name = normalize_device_name(config.device.clone());
    let device = device::pick_device(&host, device_name.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");

    let mut playback = config.playback.clone();
    let supported = device::pick_output_config(&device, playback.audio_target)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    playback.audio_target.rate = stream_config.sample_rate;
    playback.audio_target.channels = stream_config.channels as usize;
    tracing::info!(
        output_rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?supported.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "device output config"
    );

    let parts = open_source(&config, &mut playback)?;
    let mut session = Session::start(playback, parts)?;

    let quit_rx = install_quit_handler(&session)?;
    let presenter = match &config.frames_dir {
        Some(dir) if session.has_video() => {
            Some(spawn_presenter(&session, dir, config.max_frames)?)
        }
        _ => None,
    };
    let bridge = session
        .take_bridge()
        .context("render bridge already taken")?;
    let stream =
        output::build_output_stream(&device, &stream_config, supported.sample_format(), bridge)?;
    stream.play()?;

    if !wait_for_end(session.events(), &quit_rx) {
        session.request_quit();
    }
    if let Some(handle) = presenter {
        match handle.join() {
            Ok(written) => tracing::info!(written, "pictures written"),
            Err(_) => tracing::warn!("presenter thread panicked"),
        }
    }

    drop(stream);
    let stats = session.context().stats.snapshot();
    session.shutdown();
    tracing::info!(
        batches = stats.audio_batches,
        bytes = stats.audio_bytes,
        underruns = stats.underrun_events,
        silence_bytes = stats.silence_bytes,
        decode_errors = stats.audio_decode_errors,
        pictures_displayed = stats.pictures_displayed,
        pictures_dropped = stats.pictures_dropped,
        "playback finished"
    );
    Ok(())
}

/// Open `config.path` with FFmpeg; the video stream is decoded only when pictures have
/// somewhere to go.
#[cfg(feature = "ffmpeg")]
fn open_source(config: &PlayConfig, playback: &mut PlaybackConfig) -> Result<SessionParts> {
    use av_player::decoder::Decoder;
    use av_player::ffmpeg_source::FfmpegDemuxer;
    use av_player::media::VideoFrame;
    use av_player::scale::{FfmpegScaler, Scaler};

    let demuxer = FfmpegDemuxer::open(&config.path)?;
    let streams = demuxer.streams();
    let routing = demux::select_streams(&streams)?;
    let audio_decoder = demuxer.audio_decoder(routing.audio)?;

    let video = match (routing.video, &config.frames_dir) {
        (Some(index), Some(_)) => {
            let native = streams
                .iter()
                .find(|s| s.index == index)
                .and_then(|s| s.dimensions);
            let (width, height) = presentation_size(
                (config.width, config.height),
                native,
                (playback.video_width, playback.video_height),
            );
            playback.video_width = width;
            playback.video_height = height;
            tracing::info!(stream = index, width, height, "presenting video");

            let decoder = demuxer.video_decoder(index)?;
            let scaler = FfmpegScaler::from_config(playback)?;
            Some((
                Box::new(decoder) as Box<dyn Decoder<VideoFrame>>,
                Box::new(scaler) as Box<dyn Scaler>,
            ))
        }
        (Some(index), None) => {
            tracing::info!(
                stream = index,
                "video stream skipped; pass --frames-dir to write pictures"
            );
            None
        }
        (None, Some(_)) => {
            tracing::warn!("source has no video stream; --frames-dir ignored");
            None
        }
        (None, None) => None,
    };

    Ok(SessionParts {
        demuxer: Box::new(demuxer),
        audio_decoder: Box::new(audio_decoder),
        resampler_factory: RubatoResampler::factory(playback.chunk_frames),
        video,
    })
}

/// Open `config.path` with Symphonia, which reads audio only.
#[cfg(not(feature = "ffmpeg"))]
fn open_source(config: &PlayConfig, playback: &mut PlaybackConfig) -> Result<SessionParts> {
    use av_player::symphonia_source::SymphoniaDemuxer;

    if config.frames_dir.is_some() {
        anyhow::bail!("video output needs avplay built with the `ffmpeg` feature");
    }
    let demuxer = SymphoniaDemuxer::open(&config.path)?;
    let audio_index = demux::select_streams(&demuxer.streams())?.audio;
    let audio_decoder = demuxer.audio_decoder(audio_index)?;
    Ok(SessionParts {
        demuxer: Box::new(demuxer),
        audio_decoder: Box::new(audio_decoder),
        resampler_factory: RubatoResampler::factory(playback.chunk_frames),
        video: None,
    })
}

/// Flags win, then the stream's own size, then the configured default.
#[cfg(feature = "ffmpeg")]
fn presentation_size(
    flags: (Option<u32>, Option<u32>),
    native: Option<(u32, u32)>,
    default: (u32, u32),
) -> (u32, u32) {
    let (w, h) = native.unwrap_or(default);
    (flags.0.unwrap_or(w), flags.1.unwrap_or(h))
}

/// Run the presentation loop on its own thread; returns the number of pictures written.
fn spawn_presenter(
    session: &Session,
    dir: &Path,
    max_frames: Option<u64>,
) -> Result<JoinHandle<u64>> {
    let mut sink = PpmSink::new(dir, max_frames)?;
    let mut presenter = session.presenter();
    std::thread::Builder::new()
        .name("av-present".into())
        .spawn(move || {
            if let Err(e) = presenter.run(&mut sink) {
                tracing::error!("presentation stopped: {e}");
            }
            sink.written()
        })
        .context("spawn presenter thread")
}

/// Ctrl-C raises the session quit signal and wakes the main loop.
fn install_quit_handler(session: &Session) -> Result<Receiver<()>> {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    let ctx = session.context().clone();
    ctrlc::set_handler(move || {
        ctx.request_quit();
        let _ = quit_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(quit_rx)
}

/// Block until audio has drained or Ctrl-C. Returns `false` when interrupted.
fn wait_for_end(events: &Receiver<SessionEvent>, quit_rx: &Receiver<()>) -> bool {
    loop {
        select! {
            recv(events) -> ev => match ev {
                Ok(SessionEvent::AudioDrained) => {
                    tracing::info!("end of input");
                    std::thread::sleep(DRAIN_GRACE);
                    return true;
                }
                Ok(SessionEvent::DemuxFinished) => tracing::debug!("demux finished"),
                Ok(SessionEvent::VideoFinished) => tracing::debug!("video finished"),
                Err(_) => return true,
            },
            recv(quit_rx) -> _ => {
                tracing::info!("interrupted");
                return false;
            }
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
