//! Playback session: the explicit context every component shares, plus the worker threads.
//!
//! ## Threads
//! - `av-demux`: reads the container and routes units to the packet queues.
//! - `av-video-decode`: video packets → converted pictures (only when a video stream is routed).
//! - the audio device thread: calls into the [`AudioRenderBridge`] handed out by
//!   [`Session::take_bridge`].
//! - the presentation loop: whoever drives a [`Presenter`].
//!
//! [`SessionContext::request_quit`] is the single quit signal. It aborts every queue, which
//! broadcast-wakes all blocked waits, so each loop exits promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::audio_decode::AudioDecodePipeline;
use crate::bridge::AudioRenderBridge;
use crate::clock::SessionClocks;
use crate::config::PlaybackConfig;
use crate::decoder::Decoder;
use crate::demux::{self, Demuxer, Routing};
use crate::error::{PlayerError, Result};
use crate::media::{AudioFrame, VideoFrame};
use crate::packet_queue::PacketQueue;
use crate::picture_queue::PictureQueue;
use crate::presenter::Presenter;
use crate::resample::ResamplerFactory;
use crate::scale::Scaler;
use crate::stats::PlaybackStats;
use crate::video_decode::VideoDecodePipeline;

const EVENT_CAPACITY: usize = 16;

/// Lifecycle notifications delivered to the thread that owns the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The demuxer reached end of input (or failed) and finished both queues.
    DemuxFinished,
    /// The video pipeline consumed its last unit.
    VideoFinished,
    /// Audio input is exhausted; the bridge is emitting silence.
    AudioDrained,
}

/// Queues, clocks and counters shared by every stage of one session.
pub struct SessionContext {
    pub config: PlaybackConfig,
    pub audio_queue: PacketQueue,
    pub video_queue: PacketQueue,
    pub pictures: PictureQueue,
    pub clocks: SessionClocks,
    pub stats: PlaybackStats,
    quit: AtomicBool,
    audio_drained: AtomicBool,
    events: Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(config: PlaybackConfig) -> (Arc<Self>, Receiver<SessionEvent>) {
        let (events, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let pictures = PictureQueue::new(config.picture_queue_capacity);
        let ctx = Arc::new(Self {
            config,
            audio_queue: PacketQueue::new("audio"),
            video_queue: PacketQueue::new("video"),
            pictures,
            clocks: SessionClocks::default(),
            stats: PlaybackStats::default(),
            quit: AtomicBool::new(false),
            audio_drained: AtomicBool::new(false),
            events,
        });
        (ctx, events_rx)
    }

    /// Raise the quit signal and wake every blocked wait. Idempotent.
    pub fn request_quit(&self) {
        if !self.quit.swap(true, Ordering::Relaxed) {
            tracing::info!("session quit requested");
        }
        self.audio_queue.abort();
        self.video_queue.abort();
        self.pictures.abort();
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Record that audio input is exhausted. Returns `true` only for the first call.
    pub fn mark_audio_drained(&self) -> bool {
        !self.audio_drained.swap(true, Ordering::Relaxed)
    }

    pub fn audio_drained(&self) -> bool {
        self.audio_drained.load(Ordering::Relaxed)
    }

    /// Publish `event` without blocking; dropped if nobody is draining the channel.
    pub fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => tracing::debug!(?ev, "session event dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Collaborators a session is assembled from.
pub struct SessionParts {
    pub demuxer: Box<dyn Demuxer>,
    pub audio_decoder: Box<dyn Decoder<AudioFrame>>,
    pub resampler_factory: ResamplerFactory,
    /// Decoder and scaler for the video stream; `None` plays audio only.
    pub video: Option<(Box<dyn Decoder<VideoFrame>>, Box<dyn Scaler>)>,
}

pub struct Session {
    ctx: Arc<SessionContext>,
    events: Receiver<SessionEvent>,
    bridge: Option<AudioRenderBridge>,
    routing: Routing,
    threads: Vec<JoinHandle<()>>,
}

impl Session {
    /// Pick streams, create the queues and spawn the demux and video decode threads.
    ///
    /// On failure everything already started is aborted and joined before returning.
    pub fn start(config: PlaybackConfig, parts: SessionParts) -> Result<Self> {
        let SessionParts {
            demuxer,
            audio_decoder,
            resampler_factory,
            video,
        } = parts;

        let streams = demuxer.streams();
        let mut routing = demux::select_streams(&streams)?;
        let video = match (routing.video, video) {
            (Some(_), Some(parts)) => Some(parts),
            (Some(index), None) => {
                tracing::info!(stream = index, "no video decoder supplied; video stream ignored");
                routing.video = None;
                None
            }
            (None, _) => None,
        };

        let audio_stream = streams
            .iter()
            .find(|s| s.index == routing.audio)
            .ok_or(PlayerError::NoStream("audio"))?;
        let video_stream = routing
            .video
            .and_then(|index| streams.iter().find(|s| s.index == index));

        let (ctx, events) = SessionContext::new(config);
        let pipeline = AudioDecodePipeline::new(
            ctx.clone(),
            audio_decoder,
            audio_stream,
            resampler_factory,
        );
        let bridge = AudioRenderBridge::new(ctx.clone(), pipeline);

        let mut session = Session {
            ctx: ctx.clone(),
            events,
            bridge: Some(bridge),
            routing,
            threads: Vec::new(),
        };

        let demux_ctx = ctx.clone();
        let handle = spawn_named("av-demux", move || {
            demux::run_demux(demuxer, demux_ctx, routing)
        })?;
        session.threads.push(handle);

        match (video, video_stream) {
            (Some((decoder, scaler)), Some(stream)) => {
                let pipeline = VideoDecodePipeline::new(ctx.clone(), decoder, scaler, stream);
                let handle = spawn_named("av-video-decode", move || pipeline.run())?;
                session.threads.push(handle);
            }
            _ => {
                ctx.video_queue.finish();
                ctx.pictures.finish();
            }
        }

        tracing::info!(
            audio_stream = ?session.routing.audio,
            video_stream = ?session.routing.video,
            video_size = ?video_stream.and_then(|s| s.dimensions),
            presentation = ?(ctx.config.video_width, ctx.config.video_height),
            target_rate_hz = ctx.config.audio_target.rate,
            target_channels = ctx.config.audio_target.channels,
            "session started"
        );
        Ok(session)
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn has_video(&self) -> bool {
        self.routing.video.is_some()
    }

    /// Hand the render bridge to the audio output. Returns `None` after the first call.
    pub fn take_bridge(&mut self) -> Option<AudioRenderBridge> {
        self.bridge.take()
    }

    /// Presentation loop bound to this session's picture queue and audio clock.
    pub fn presenter(&self) -> Presenter {
        Presenter::new(self.ctx.clone())
    }

    pub fn request_quit(&self) {
        self.ctx.request_quit();
    }

    /// Raise quit and join every worker thread.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        self.ctx.request_quit();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "session thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// Spawn a named worker; failure to create the thread is a fatal setup error.
fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| PlayerError::ResourceUnavailable(format!("spawn {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CompressedUnit, StreamInfo, StreamKind, TimeBase};
    use crate::picture_queue::Acquire;
    use crate::resample::RubatoResampler;
    use crate::testing::{CopyScaler, MockAudioDecoder, MockDemuxer, MockVideoDecoder, RecordingSink};
    use std::time::Duration;

    fn streams(with_video: bool) -> Vec<StreamInfo> {
        let mut out = vec![StreamInfo::new(0, StreamKind::Audio, TimeBase::new(1, 48_000))];
        if with_video {
            out.push(StreamInfo::new(1, StreamKind::Video, TimeBase::new(1, 1000)));
        }
        out
    }

    fn parts(demuxer: MockDemuxer, video: bool) -> SessionParts {
        let video = video.then(|| {
            (
                Box::new(MockVideoDecoder::new(16, 16)) as Box<dyn Decoder<VideoFrame>>,
                Box::new(CopyScaler) as Box<dyn Scaler>,
            )
        });
        SessionParts {
            demuxer: Box::new(demuxer),
            audio_decoder: Box::new(MockAudioDecoder::new(48_000, 2, 480, 1)),
            resampler_factory: RubatoResampler::factory(256),
            video,
        }
    }

    #[test]
    fn audio_only_session_drains_to_silence_and_reports_it() {
        let units = (0..5).map(|_| CompressedUnit::new(0, vec![1])).collect();
        let demuxer = MockDemuxer::new(streams(false), units);
        let mut session = Session::start(PlaybackConfig::default(), parts(demuxer, false)).unwrap();
        assert!(!session.has_video());

        let mut bridge = session.take_bridge().unwrap();
        assert!(session.take_bridge().is_none());

        let mut out = vec![0u8; 4096];
        let mut drained = false;
        for _ in 0..20 {
            bridge.fill(&mut out);
            if session
                .events()
                .try_iter()
                .any(|ev| ev == SessionEvent::AudioDrained)
            {
                drained = true;
                break;
            }
        }
        assert!(drained);
        assert_eq!(session.context().stats.snapshot().audio_bytes, 5 * 480 * 4);
        session.shutdown();
    }

    #[test]
    fn video_session_presents_pictures_in_order() {
        let mut units = Vec::new();
        for i in 0..4i64 {
            units.push(CompressedUnit::new(1, vec![i as u8]).with_timestamps(None, Some(i * 40)));
        }
        let demuxer = MockDemuxer::new(streams(true), units);
        let session = Session::start(PlaybackConfig::default(), parts(demuxer, true)).unwrap();
        assert!(session.has_video());

        // No audio plays here; pin the audio clock so only the last picture is in sync.
        session.context().clocks.audio.set(0.125);
        let mut presenter = session.presenter();
        let mut sink = RecordingSink::default();
        presenter.run(&mut sink).unwrap();

        assert_eq!(sink.shown, vec![0.120]);
        let snap = session.context().stats.snapshot();
        assert_eq!(snap.pictures_dropped, 3);
        assert_eq!(snap.pictures_displayed, 1);
        session.shutdown();
    }

    #[test]
    fn quit_unblocks_every_thread() {
        // The demuxer never reaches EOF, so without quit the threads would run forever.
        let demuxer = MockDemuxer::endless(streams(true), 1);
        let mut session = Session::start(PlaybackConfig::default(), parts(demuxer, true)).unwrap();
        let _bridge = session.take_bridge();

        thread::sleep(Duration::from_millis(20));
        session.request_quit();
        assert_eq!(session.context().pictures.acquire_read_slot(true), Acquire::Aborted);
        session.shutdown();
    }

    #[test]
    fn missing_audio_stream_fails_setup() {
        let only_video = vec![StreamInfo::new(1, StreamKind::Video, TimeBase::new(1, 1000))];
        let demuxer = MockDemuxer::new(only_video, Vec::new());
        let err = Session::start(PlaybackConfig::default(), parts(demuxer, false))
            .err()
            .unwrap();
        assert!(matches!(err, PlayerError::NoStream("audio")));
    }

    #[test]
    fn request_quit_is_idempotent_and_aborts_queues() {
        let (ctx, _events) = SessionContext::new(PlaybackConfig::default());
        ctx.request_quit();
        ctx.request_quit();
        assert!(ctx.quit_requested());
        assert!(ctx.audio_queue.is_aborted());
        assert!(ctx.video_queue.is_aborted());
        assert!(ctx.pictures.is_aborted());
    }

    #[test]
    fn emit_never_blocks_when_channel_is_full() {
        let (ctx, events) = SessionContext::new(PlaybackConfig::default());
        for _ in 0..(EVENT_CAPACITY * 2) {
            ctx.emit(SessionEvent::DemuxFinished);
        }
        assert_eq!(events.try_iter().count(), EVENT_CAPACITY);
    }
}
