//! Synchronized audio/video playback engine.
//!
//! Stages, leaves first: packet queues, decode pipelines, the audio render bridge pulled
//! by the output device, and the presenter that syncs pictures to the audio clock.
//! [`session::Session`] wires them together.

pub mod audio_decode;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod device;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source;
pub mod media;
pub mod output;
pub mod packet_queue;
pub mod picture_queue;
pub mod ppm;
pub mod presenter;
pub mod resample;
pub mod scale;
pub mod session;
pub mod stats;
pub mod symphonia_source;
pub mod video_decode;

#[cfg(test)]
pub(crate) mod testing;
