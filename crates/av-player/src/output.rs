//! Audio output stage (CPAL output stream).
//!
//! The device callback asks the [`AudioRenderBridge`] for exactly the number of bytes the
//! device buffer needs, then converts the bridge's samples to the device sample format.
//! The stream config must match the bridge's rate and channel count; the session's
//! target format is chosen from the device config before the session starts.

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::bridge::AudioRenderBridge;
use crate::media::SampleFormat;

/// Build a CPAL output stream fed by `bridge`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    bridge: AudioRenderBridge,
) -> Result<cpal::Stream> {
    let format = bridge.format();
    if config.channels as usize != format.channels || config.sample_rate != format.rate {
        return Err(anyhow!(
            "stream config {}Hz/{}ch does not match session audio {}Hz/{}ch",
            config.sample_rate,
            config.channels,
            format.rate,
            format.channels
        ));
    }

    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, bridge),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, bridge),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, bridge),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, bridge),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut bridge: AudioRenderBridge,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16> + cpal::FromSample<f32>,
{
    let sample_format = bridge.format().sample_format;
    let bytes_per_sample = sample_format.bytes_per_sample();
    let mut scratch: Vec<u8> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len() * bytes_per_sample, 0);
            bridge.fill(&mut scratch);
            write_samples(data, &scratch, sample_format);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Convert interleaved bridge bytes into device samples.
fn write_samples<T>(data: &mut [T], bytes: &[u8], format: SampleFormat)
where
    T: cpal::Sample + cpal::FromSample<i16> + cpal::FromSample<f32>,
{
    match format {
        SampleFormat::S16 => {
            for (out, b) in data.iter_mut().zip(bytes.chunks_exact(2)) {
                *out = T::from_sample(i16::from_ne_bytes([b[0], b[1]]));
            }
        }
        SampleFormat::F32 => {
            for (out, b) in data.iter_mut().zip(bytes.chunks_exact(4)) {
                *out = T::from_sample(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]));
            }
        }
    }
}
