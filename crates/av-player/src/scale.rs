//! Picture conversion to the presentation size and pixel format.
//!
//! [`Scaler`] is what the video decode pipeline converts through. With the `ffmpeg`
//! feature, [`FfmpegScaler`] implements it on top of libswscale.

use crate::error::Result;
use crate::media::VideoFrame;
use crate::picture_queue::Picture;

#[cfg(feature = "ffmpeg")]
pub use self::swscale::{FfmpegScaler, pixel_to_format};

/// Long-lived conversion context for the video pipeline.
pub trait Scaler: Send {
    /// Convert `frame` into `dst`, reusing `dst.data`'s allocation. Sets `width`, `height`
    /// and `format`; the timestamp is left to the caller.
    fn convert(&mut self, frame: &VideoFrame, dst: &mut Picture) -> Result<()>;
}

#[cfg(feature = "ffmpeg")]
mod swscale {
    use ffmpeg_next as ffmpeg;
    use ffmpeg_next::format::Pixel;
    use ffmpeg_next::software::scaling::{Context, Flags};

    use super::Scaler;
    use crate::config::PlaybackConfig;
    use crate::error::{PlayerError, Result};
    use crate::media::{PixelFormat, VideoFrame};
    use crate::picture_queue::Picture;

    fn pixel_from_format(format: PixelFormat) -> Pixel {
        match format {
            PixelFormat::Rgb24 => Pixel::RGB24,
            PixelFormat::Rgba => Pixel::RGBA,
            PixelFormat::Yuv420p => Pixel::YUV420P,
        }
    }

    pub fn pixel_to_format(pixel: Pixel) -> Option<PixelFormat> {
        match pixel {
            Pixel::RGB24 => Some(PixelFormat::Rgb24),
            Pixel::RGBA => Some(PixelFormat::Rgba),
            Pixel::YUV420P => Some(PixelFormat::Yuv420p),
            _ => None,
        }
    }

    /// libswscale conversion into packed RGB at a fixed presentation size.
    ///
    /// The swscale context is rebuilt whenever the source format or size changes.
    pub struct FfmpegScaler {
        width: u32,
        height: u32,
        format: PixelFormat,
        context: Option<Context>,
        /// Source frame the decoded planes are copied into before scaling.
        source: ffmpeg::frame::Video,
        output: ffmpeg::frame::Video,
    }

    // SAFETY: the swscale context and frames are owned by the scaler and only touched
    // from the thread that currently owns it (the video decode thread).
    unsafe impl Send for FfmpegScaler {}

    impl FfmpegScaler {
        pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
            if width == 0 || height == 0 {
                return Err(PlayerError::ResourceUnavailable(format!(
                    "invalid presentation size {width}x{height}"
                )));
            }
            if format == PixelFormat::Yuv420p {
                return Err(PlayerError::ResourceUnavailable(
                    "presentation format must be packed RGB".into(),
                ));
            }
            ffmpeg::init()
                .map_err(|e| PlayerError::ResourceUnavailable(format!("ffmpeg init: {e}")))?;
            Ok(Self {
                width,
                height,
                format,
                context: None,
                source: ffmpeg::frame::Video::empty(),
                output: ffmpeg::frame::Video::empty(),
            })
        }

        /// Scaler for the session's configured presentation size and format.
        pub fn from_config(config: &PlaybackConfig) -> Result<Self> {
            Self::new(config.video_width, config.video_height, config.video_format)
        }

        fn ensure_context(&mut self, frame: &VideoFrame) -> Result<()> {
            let src_format = pixel_from_format(frame.format);
            let stale = self.context.as_ref().is_none_or(|c| {
                let input = c.input();
                input.format != src_format
                    || input.width != frame.width
                    || input.height != frame.height
            });
            if !stale {
                return Ok(());
            }
            if self.context.is_some() {
                tracing::info!(
                    src_w = frame.width,
                    src_h = frame.height,
                    format = ?frame.format,
                    "video source changed; rebuilding scaler"
                );
            }
            let context = Context::get(
                src_format,
                frame.width,
                frame.height,
                pixel_from_format(self.format),
                self.width,
                self.height,
                Flags::BILINEAR,
            )
            .map_err(|e| PlayerError::ResourceUnavailable(format!("create scaler: {e}")))?;
            self.context = Some(context);
            self.source = ffmpeg::frame::Video::new(src_format, frame.width, frame.height);
            self.output = ffmpeg::frame::Video::empty();
            Ok(())
        }

        /// Copy the tightly packed planes of `frame` into the strided source frame.
        fn load_source(&mut self, frame: &VideoFrame) {
            let planes = frame.format.planes(frame.width, frame.height);
            let mut offset = 0;
            for (plane, (row, rows)) in planes.into_iter().enumerate() {
                let stride = self.source.stride(plane);
                let data = self.source.data_mut(plane);
                for y in 0..rows {
                    let src = &frame.data[offset + y * row..offset + (y + 1) * row];
                    data[y * stride..y * stride + row].copy_from_slice(src);
                }
                offset += row * rows;
            }
        }
    }

    impl Scaler for FfmpegScaler {
        fn convert(&mut self, frame: &VideoFrame, dst: &mut Picture) -> Result<()> {
            if frame.width == 0 || frame.height == 0 {
                return Err(PlayerError::Decode("empty video frame".into()));
            }
            let expected = frame.format.buffer_size(frame.width, frame.height);
            if frame.data.len() < expected {
                return Err(PlayerError::Decode(format!(
                    "video frame holds {} bytes, {expected} expected",
                    frame.data.len()
                )));
            }

            self.ensure_context(frame)?;
            self.load_source(frame);
            let Some(context) = self.context.as_mut() else {
                return Err(PlayerError::ResourceUnavailable("scaler not initialized".into()));
            };
            context
                .run(&self.source, &mut self.output)
                .map_err(|e| PlayerError::Decode(format!("scale: {e}")))?;

            let row = self.format.planes(self.width, self.height)[0].0;
            let stride = self.output.stride(0);
            let data = self.output.data(0);
            dst.data.clear();
            for y in 0..self.height as usize {
                dst.data.extend_from_slice(&data[y * stride..y * stride + row]);
            }
            dst.width = self.width;
            dst.height = self.height;
            dst.format = self.format;
            Ok(())
        }
    }
}
