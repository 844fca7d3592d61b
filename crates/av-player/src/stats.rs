use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the pipelines while a session runs.
///
/// Every field is written with relaxed ordering from whichever thread owns the event
/// (the audio callback, the video decode thread, the presenter).
#[derive(Debug, Default)]
pub struct PlaybackStats {
    /// Decode batches delivered to the render bridge.
    pub audio_batches: AtomicU64,
    /// Bytes of decoded audio written to the device.
    pub audio_bytes: AtomicU64,
    /// Times the bridge had to substitute silence.
    pub underrun_events: AtomicU64,
    /// Total bytes of substituted silence.
    pub silence_bytes: AtomicU64,
    pub audio_decode_errors: AtomicU64,
    pub video_decode_errors: AtomicU64,
    /// Pictures converted and queued by the video pipeline.
    pub pictures_queued: AtomicU64,
    pub pictures_displayed: AtomicU64,
    pub pictures_dropped: AtomicU64,
}

/// Point-in-time copy of [`PlaybackStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub audio_batches: u64,
    pub audio_bytes: u64,
    pub underrun_events: u64,
    pub silence_bytes: u64,
    pub audio_decode_errors: u64,
    pub video_decode_errors: u64,
    pub pictures_queued: u64,
    pub pictures_displayed: u64,
    pub pictures_dropped: u64,
}

impl PlaybackStats {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            audio_batches: load(&self.audio_batches),
            audio_bytes: load(&self.audio_bytes),
            underrun_events: load(&self.underrun_events),
            silence_bytes: load(&self.silence_bytes),
            audio_decode_errors: load(&self.audio_decode_errors),
            video_decode_errors: load(&self.video_decode_errors),
            pictures_queued: load(&self.pictures_queued),
            pictures_displayed: load(&self.pictures_displayed),
            pictures_dropped: load(&self.pictures_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_counters() {
        let stats = PlaybackStats::default();
        PlaybackStats::bump(&stats.underrun_events, 2);
        PlaybackStats::bump(&stats.silence_bytes, 2048);
        PlaybackStats::bump(&stats.pictures_dropped, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.underrun_events, 2);
        assert_eq!(snap.silence_bytes, 2048);
        assert_eq!(snap.pictures_dropped, 1);
        assert_eq!(snap.audio_bytes, 0);
    }
}
