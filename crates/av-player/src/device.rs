//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the session's target audio format

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::media::{AudioFormat, SampleFormat};

/// Output device whose name contains `needle` (case-insensitive), or the host default
/// when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .context("host has no default output device");
    };
    let mut devices = host.output_devices().context("enumerate output devices")?;
    devices
        .find(|d| device_name(d).is_some_and(|name| name_contains(&name, needle)))
        .ok_or_else(|| anyhow!("no output device name contains {needle:?}"))
}

/// Choose the supported output config closest to `target`.
///
/// Candidates are ranked by, in order: exact channel count, sample rate (exact, then
/// the highest rate below the target, then the lowest above), and sample format
/// (the target's own format first).
pub fn pick_output_config(
    device: &cpal::Device,
    target: AudioFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target.rate);
        let candidate = Candidate {
            channels_match: range.channels() as usize == target.channels,
            below: rate <= target.rate,
            rate,
            format_rank: sample_format_rank(range.sample_format(), target.sample_format),
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => candidate.is_better_than(current, target.rate),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Upper bound on a fixed device buffer, in frames.
const MAX_BUFFER_FRAMES: u32 = 4096;

/// Fixed buffer size for the stream: the device's largest, capped at 4096 frames (or its
/// minimum when that is already above the cap). `None` keeps CPAL's default when the
/// device does not report a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(capped_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn capped_buffer_frames(min: u32, max: u32) -> u32 {
    max.min(MAX_BUFFER_FRAMES).max(min)
}

/// Print every output device to stdout, marking the host default with `*`.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let default = host.default_output_device().as_ref().and_then(device_name);
    let devices = host.output_devices().context("enumerate output devices")?;
    for (index, device) in devices.enumerate() {
        let name = device_name(&device).unwrap_or_else(|| "<unnamed>".to_string());
        let is_default = default.as_deref() == Some(name.as_str());
        println!("{}", device_line(index, &name, is_default));
    }
    Ok(())
}

fn device_line(index: usize, name: &str, is_default: bool) -> String {
    let marker = if is_default { '*' } else { ' ' };
    format!("{marker} #{index}: {name}")
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channels_match: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate, target_rate: u32) -> bool {
        if self.channels_match != other.channels_match {
            return self.channels_match;
        }
        let exact = self.rate == target_rate;
        let other_exact = other.rate == target_rate;
        if exact != other_exact {
            return exact;
        }
        if self.below != other.below {
            return self.below;
        }
        if self.rate != other.rate {
            // Below the target, higher is closer; above it, lower is closer.
            return if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            };
        }
        self.format_rank < other.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat, preferred: SampleFormat) -> u8 {
    let native = match preferred {
        SampleFormat::S16 => cpal::SampleFormat::I16,
        SampleFormat::F32 => cpal::SampleFormat::F32,
    };
    if format == native {
        return 0;
    }
    match format {
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::I16 => 3,
        cpal::SampleFormat::U16 => 4,
        _ => 10,
    }
}

fn name_contains(name: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    !needle.is_empty() && name.to_lowercase().contains(&needle)
}
