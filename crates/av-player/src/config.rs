use crate::media::{AudioFormat, PixelFormat, SampleFormat};

/// Playback tuning parameters shared by the decode, bridge and presentation stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Format the render bridge hands to the audio device.
    pub audio_target: AudioFormat,
    /// Render bridge working buffer in bytes. Grown when the stream declares larger units;
    /// output that still does not fit is carried over to the next batch.
    pub audio_buffer_bytes: usize,
    /// Silence substituted when a decode batch fails or the stream is drained.
    pub silence_bytes: usize,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Picture queue slots. 1 means decode and presentation strictly alternate.
    pub picture_queue_capacity: usize,
    /// Presentation size and format of converted pictures.
    pub video_width: u32,
    pub video_height: u32,
    pub video_format: PixelFormat,
    /// Window around the audio clock inside which a picture is shown immediately.
    pub sync_tolerance_secs: f64,
    /// Demuxer backpressure: stop reading while a queue holds this many bytes.
    pub max_audio_queue_bytes: usize,
    pub max_video_queue_bytes: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            audio_target: AudioFormat::new(48_000, 2, SampleFormat::S16),
            audio_buffer_bytes: 65_536,
            silence_bytes: 1024,
            chunk_frames: 1024,
            picture_queue_capacity: 1,
            video_width: 720,
            video_height: 480,
            video_format: PixelFormat::Rgb24,
            sync_tolerance_secs: 0.040,
            max_audio_queue_bytes: 5 * 1024 * 1024,
            max_video_queue_bytes: 15 * 1024 * 1024,
        }
    }
}
