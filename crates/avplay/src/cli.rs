use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use av_player::config::PlaybackConfig;
use av_player::media::SampleFormat;

#[derive(Parser, Debug)]
#[command(name = "avplay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Preferred output sample rate; the device's closest supported rate is used
    #[arg(long, default_value_t = 48_000)]
    pub rate: u32,

    /// Preferred output channel count
    #[arg(long, default_value_t = 2)]
    pub channels: usize,

    /// Sample format handed from the decoder to the device callback
    #[arg(long, value_enum, default_value_t = FormatArg::S16)]
    pub format: FormatArg,

    /// Render bridge working buffer in bytes; grown to fit the largest unit the stream declares
    #[arg(long, default_value_t = 65_536)]
    pub buffer_bytes: usize,

    /// Silence inserted when a unit fails to decode, in bytes
    #[arg(long, default_value_t = 1024)]
    pub silence_bytes: usize,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Audio/video sync tolerance in milliseconds
    #[arg(long, default_value_t = 40)]
    pub sync_tolerance_ms: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file until it ends or Ctrl-C
    Play {
        /// Path to a media file
        path: PathBuf,

        /// Write presented pictures as frame<N>.ppm into this directory (needs `ffmpeg`)
        #[arg(long)]
        frames_dir: Option<PathBuf>,

        /// Stop writing pictures after this many
        #[arg(long)]
        max_frames: Option<u64>,

        /// Presentation width; defaults to the video stream's width
        #[arg(long)]
        width: Option<u32>,

        /// Presentation height; defaults to the video stream's height
        #[arg(long)]
        height: Option<u32>,
    },

    /// List output devices and exit
    Devices,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    S16,
    F32,
}

impl Args {
    /// Session tuning derived from the flags; untouched fields keep their defaults.
    pub fn playback_config(&self) -> PlaybackConfig {
        let mut config = PlaybackConfig::default();
        config.audio_target.rate = self.rate;
        config.audio_target.channels = self.channels.max(1);
        config.audio_target.sample_format = match self.format {
            FormatArg::S16 => SampleFormat::S16,
            FormatArg::F32 => SampleFormat::F32,
        };
        config.audio_buffer_bytes = self.buffer_bytes;
        config.silence_bytes = self.silence_bytes;
        config.chunk_frames = self.chunk_frames.max(1);
        config.sync_tolerance_secs = self.sync_tolerance_ms as f64 / 1000.0;
        config
    }
}
