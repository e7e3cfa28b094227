//! Frame source backed by still images, cycled one per grab

use std::path::Path;

use tracing::{debug, info, instrument};

use super::frame::Frame;
use super::FrameSource;
use crate::error::CaptureError;

/// Replays a fixed set of images as if they were a camera stream
#[derive(Debug)]
pub struct StillFrameSource {
    frames: Vec<Frame>,
    next: usize,
    sequence: u64,
    warmup: u32,
}

impl StillFrameSource {
    /// Load every image in `paths` (any format the `image` crate decodes).
    #[instrument(skip_all, fields(count = paths.len()))]
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, CaptureError> {
        let mut frames = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            let image = image::open(path).map_err(|e| {
                CaptureError::Source(format!("failed to open {}: {}", path.display(), e))
            })?;
            debug!("Loaded {} ({}x{})", path.display(), image.width(), image.height());
            frames.push(Frame::from_rgba_image(index as u64, image.to_rgba8()));
        }
        info!("Still source ready with {} frame(s)", frames.len());
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            next: 0,
            sequence: 0,
            warmup: 0,
        }
    }

    /// Report `NotReady` for the first `grabs` calls, like a camera warming up.
    pub fn with_warmup(mut self, grabs: u32) -> Self {
        self.warmup = grabs;
        self
    }
}

impl FrameSource for StillFrameSource {
    fn grab(&mut self, max_width: u32) -> Result<Frame, CaptureError> {
        if self.warmup > 0 {
            self.warmup -= 1;
            return Err(CaptureError::NotReady);
        }
        if self.frames.is_empty() {
            return Err(CaptureError::NotReady);
        }

        let frame = &self.frames[self.next % self.frames.len()];
        self.next += 1;
        self.sequence += 1;

        frame.restamped(self.sequence).scaled_to_width(max_width)
    }
}
