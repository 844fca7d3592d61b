//! Container reading and stream routing.

use std::sync::Arc;

use crate::error::{PlayerError, Result};
use crate::media::{CompressedUnit, StreamInfo, StreamKind};
use crate::packet_queue::PacketQueue;
use crate::session::{SessionContext, SessionEvent};

/// Source of compressed units.
pub trait Demuxer: Send {
    /// Streams found when the input was opened.
    fn streams(&self) -> Vec<StreamInfo>;

    /// Next unit in container order, or `None` at end of input.
    fn read_next(&mut self) -> Result<Option<CompressedUnit>>;
}

/// Stream indices the session plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Routing {
    pub audio: usize,
    pub video: Option<usize>,
}

/// Pick the first audio stream (required) and the first video stream (optional).
pub fn select_streams(streams: &[StreamInfo]) -> Result<Routing> {
    let first = |kind: StreamKind| streams.iter().find(|s| s.kind == kind).map(|s| s.index);
    let audio = first(StreamKind::Audio).ok_or(PlayerError::NoStream("audio"))?;
    Ok(Routing {
        audio,
        video: first(StreamKind::Video),
    })
}

/// Read units until end of input or quit, routing each to its stream's queue.
///
/// Both queues are finished on exit so the consumers drain and stop.
pub fn run_demux(mut demuxer: Box<dyn Demuxer>, ctx: Arc<SessionContext>, routing: Routing) {
    let mut routed = 0u64;
    let mut skipped = 0u64;

    loop {
        if ctx.quit_requested() {
            break;
        }
        let unit = match demuxer.read_next() {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                tracing::info!(routed, skipped, "demux reached end of input");
                break;
            }
            Err(e) => {
                tracing::error!(routed, "demux failed: {e}");
                break;
            }
        };

        let (queue, budget) = if unit.stream == routing.audio {
            (&ctx.audio_queue, ctx.config.max_audio_queue_bytes)
        } else if Some(unit.stream) == routing.video {
            (&ctx.video_queue, ctx.config.max_video_queue_bytes)
        } else {
            skipped += 1;
            continue;
        };

        if !route(queue, budget, unit) {
            break;
        }
        routed += 1;
    }

    ctx.audio_queue.finish();
    ctx.video_queue.finish();
    ctx.emit(SessionEvent::DemuxFinished);
}

/// Wait for room under `budget`, then enqueue. `false` once the queue is aborted.
fn route(queue: &PacketQueue, budget: usize, unit: CompressedUnit) -> bool {
    if !queue.wait_below(budget) {
        return false;
    }
    if queue.put(unit).is_err() {
        tracing::debug!(queue = queue.name(), "unit discarded; queue closed");
        return false;
    }
    true
}
