pub mod decoder;
pub mod frame;
pub mod still;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{Frame, PixelFormat, Rect};
pub use still::StillFrameSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;

/// Supplies successive frames from a live stream.
///
/// `grab` returns a frame no wider than `max_width` (aspect ratio preserved),
/// or [`CaptureError::NotReady`] while the stream has nothing to give yet.
pub trait FrameSource: Send {
    fn grab(&mut self, max_width: u32) -> Result<Frame, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self, max_width: u32) -> Result<Frame, CaptureError> {
        (**self).grab(max_width)
    }
}
