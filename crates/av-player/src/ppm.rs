//! Video sink that writes each presented picture to `frame<N>.ppm` (binary P6).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PlayerError, Result};
use crate::media::PixelFormat;
use crate::picture_queue::Picture;
use crate::presenter::VideoSink;

pub struct PpmSink {
    dir: PathBuf,
    /// Stop writing after this many pictures; presentation carries on.
    max_frames: Option<u64>,
    written: u64,
}

impl PpmSink {
    /// Sink writing into `dir`, which is created if missing.
    pub fn new(dir: impl Into<PathBuf>, max_frames: Option<u64>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| PlayerError::Output(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            max_frames,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn write(&self, path: &Path, picture: &Picture) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        write!(out, "P6\n{} {}\n255\n", picture.width, picture.height)?;
        let pixels = picture.width as usize * picture.height as usize;
        match picture.format {
            PixelFormat::Rgb24 => out.write_all(&picture.data[..pixels * 3])?,
            PixelFormat::Rgba => {
                for px in picture.data[..pixels * 4].chunks_exact(4) {
                    out.write_all(&px[..3])?;
                }
            }
            PixelFormat::Yuv420p => return Err(std::io::Error::other("planar picture")),
        }
        out.flush()
    }
}

impl VideoSink for PpmSink {
    fn present(&mut self, picture: &Picture) -> Result<()> {
        if self.max_frames.is_some_and(|max| self.written >= max) {
            return Ok(());
        }
        if picture.format == PixelFormat::Yuv420p {
            return Err(PlayerError::Output("PPM output needs RGB pictures".into()));
        }
        if picture.data.len() < picture.format.buffer_size(picture.width, picture.height) {
            return Err(PlayerError::Output(format!(
                "picture holds {} bytes for {}x{}",
                picture.data.len(),
                picture.width,
                picture.height
            )));
        }

        let path = self.dir.join(format!("frame{}.ppm", self.written + 1));
        self.write(&path, picture)
            .map_err(|e| PlayerError::Output(format!("write {}: {e}", path.display())))?;
        self.written += 1;
        tracing::trace!(path = %path.display(), pts = picture.pts, "picture written");
        Ok(())
    }
}
