//! avplay: plays a media file through the av-player engine.
//!
//! ## Pipeline
//! 1. **Demux**: a background thread reads the container and queues compressed units.
//! 2. **Decode + resample**: driven from the CPAL callback through the render bridge, which
//!    decodes one unit at a time and converts it to the device format.
//! 3. **Playback**: the CPAL callback copies bridge output into the device buffer.
//! 4. **Video** (`ffmpeg` feature, `--frames-dir`): a decode thread scales pictures to the
//!    presentation size and a presenter thread writes them as PPM files, synced to the
//!    audio clock.
//!
//! Without the `ffmpeg` feature sources are opened with Symphonia and play audio only.
//!
//! Ctrl-C raises the session quit signal; every stage stops promptly and the process exits.

mod cli;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,av_player=info,avplay=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::Devices => runtime::list_devices(),
        cli::Command::Play {
            path,
            frames_dir,
            max_frames,
            width,
            height,
        } => runtime::run_play(runtime::PlayConfig {
            path: path.clone(),
            device: args.device.clone(),
            playback: args.playback_config(),
            frames_dir: frames_dir.clone(),
            max_frames: *max_frames,
            width: *width,
            height: *height,
        }),
    }
}
