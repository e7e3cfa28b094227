use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb, Rgba};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CaptureError;

/// Immutable frame snapshot - cloning shares the pixel buffer
#[derive(Clone)]
pub struct Frame {
    /// Pixel data, never mutated once the frame exists
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Gray8,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed layouts, `None` for compressed ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 => Some(4),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Whether pixels can be read directly as intensity/colour samples.
    pub fn is_planar_rgb_or_gray(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Rgba32 | PixelFormat::Gray8
        )
    }
}

/// Pixel rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle is non-empty and lies inside `width` x `height`.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

impl Frame {
    /// Build a frame with a tightly packed stride, validating the buffer length.
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, CaptureError> {
        let data = data.into();
        let stride = match format.bytes_per_pixel() {
            Some(bpp) => width.checked_mul(bpp).ok_or_else(|| {
                CaptureError::InvalidFrame(format!("{:?} row of {} pixels overflows the stride", format, width))
            })?,
            None => 0,
        };

        if let Some(bpp) = format.bytes_per_pixel() {
            let expected = width as usize * height as usize * bpp as usize;
            if data.len() != expected {
                return Err(CaptureError::InvalidFrame(format!(
                    "{:?} {}x{} needs {} bytes, got {}",
                    format,
                    width,
                    height,
                    expected,
                    data.len()
                )));
            }
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn from_rgba_image(sequence: u64, image: ImageBuffer<Rgba<u8>, Vec<u8>>) -> Self {
        let (width, height) = image.dimensions();
        Self::packed(sequence, width, height, PixelFormat::Rgba32, image.into_raw())
    }

    // Buffer length is guaranteed by the image buffer it came from.
    fn packed(sequence: u64, width: u32, height: u32, format: PixelFormat, raw: Vec<u8>) -> Self {
        let bpp = format.bytes_per_pixel().unwrap_or(1);
        Self {
            data: Bytes::from(raw),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * bpp,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Same pixels under a new sequence number and capture time.
    pub fn restamped(&self, sequence: u64) -> Self {
        let mut meta = (*self.meta).clone();
        meta.sequence = sequence;
        Self {
            data: self.data.clone(),
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    /// Frame derived from this one (same sequence and capture time).
    pub fn derived(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, CaptureError> {
        let mut frame = Self::new(self.sequence(), width, height, format, data)?;
        frame.timestamp = self.timestamp;
        Ok(frame)
    }

    /// Downscale to at most `max_width`, preserving aspect ratio.
    ///
    /// Frames already narrower than `max_width` are returned as-is; this never
    /// upscales.
    pub fn scaled_to_width(&self, max_width: u32) -> Result<Self, CaptureError> {
        let (width, height) = (self.width(), self.height());
        if max_width == 0 || width <= max_width || height == 0 {
            return Ok(self.clone());
        }

        let new_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1) as u32;
        let raw = self.packed_bytes()?;

        let scaled = match self.format() {
            PixelFormat::Gray8 => {
                let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, raw)
                    .ok_or_else(|| self.bad_buffer())?;
                imageops::resize(&img, max_width, new_height, FilterType::Triangle).into_raw()
            }
            // Channel order does not matter for resampling.
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, raw)
                    .ok_or_else(|| self.bad_buffer())?;
                imageops::resize(&img, max_width, new_height, FilterType::Triangle).into_raw()
            }
            PixelFormat::Rgba32 => {
                let img = ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, raw)
                    .ok_or_else(|| self.bad_buffer())?;
                imageops::resize(&img, max_width, new_height, FilterType::Triangle).into_raw()
            }
            other => {
                return Err(CaptureError::InvalidFrame(format!(
                    "cannot scale {:?} frames, decode first",
                    other
                )))
            }
        };

        self.derived(max_width, new_height, self.format(), scaled)
    }

    /// Intensity samples of `rect`, row-major, BT.601 luma for colour formats.
    pub fn luma(&self, rect: Rect) -> Result<Vec<u8>, CaptureError> {
        let format = self.format();
        if !format.is_planar_rgb_or_gray() {
            return Err(CaptureError::Scoring(format!(
                "no intensity for {:?} frames",
                format
            )));
        }
        if !rect.fits_within(self.width(), self.height()) {
            return Err(CaptureError::Scoring(format!(
                "region {:?} outside {}x{} frame",
                rect,
                self.width(),
                self.height()
            )));
        }

        let bpp = format.bytes_per_pixel().unwrap_or(1) as usize;
        let stride = self.meta.stride as usize;
        let last_row_end = (rect.y + rect.height - 1) as usize * stride
            + (rect.x + rect.width) as usize * bpp;
        if stride < self.width() as usize * bpp || self.data.len() < last_row_end {
            return Err(CaptureError::Scoring(format!(
                "buffer of {} bytes too short for stride {}",
                self.data.len(),
                stride
            )));
        }

        let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize);
        for y in rect.y..rect.y + rect.height {
            let row = y as usize * stride;
            let start = row + rect.x as usize * bpp;
            let end = row + (rect.x + rect.width) as usize * bpp;
            let pixels = &self.data[start..end];
            match format {
                PixelFormat::Gray8 => out.extend_from_slice(pixels),
                PixelFormat::Rgb24 => out.extend(pixels.chunks_exact(3).map(|p| bt601(p[0], p[1], p[2]))),
                PixelFormat::Bgr24 => out.extend(pixels.chunks_exact(3).map(|p| bt601(p[2], p[1], p[0]))),
                PixelFormat::Rgba32 => out.extend(pixels.chunks_exact(4).map(|p| bt601(p[0], p[1], p[2]))),
                _ => unreachable!("checked above"),
            }
        }
        Ok(out)
    }

    /// Pixel rows without stride padding.
    fn packed_bytes(&self) -> Result<Vec<u8>, CaptureError> {
        let bpp = self
            .format()
            .bytes_per_pixel()
            .ok_or_else(|| self.bad_buffer())? as usize;
        let row_len = self.width() as usize * bpp;
        let stride = self.meta.stride as usize;
        if stride == row_len {
            return Ok(self.data.to_vec());
        }

        let mut out = Vec::with_capacity(row_len * self.height() as usize);
        for y in 0..self.height() as usize {
            let start = y * stride;
            let row = self
                .data
                .get(start..start + row_len)
                .ok_or_else(|| self.bad_buffer())?;
            out.extend_from_slice(row);
        }
        Ok(out)
    }

    fn bad_buffer(&self) -> CaptureError {
        CaptureError::InvalidFrame(format!(
            "{:?} {}x{} buffer of {} bytes does not match its layout",
            self.format(),
            self.width(),
            self.height(),
            self.data.len()
        ))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// Fixed-point BT.601 luma, rounded the same way common vision libraries do.
fn bt601(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + 8192) >> 14) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Frame::new(1, 4, 4, PixelFormat::Rgb24, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidFrame(_)));
    }

    #[test]
    fn oversized_row_is_rejected_not_wrapped() {
        let err = Frame::new(1, u32::MAX, 1, PixelFormat::Rgba32, Vec::new()).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidFrame(msg) if msg.contains("stride")));
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let frame = Frame::new(1, 3, 1, PixelFormat::Rgb24, vec![255, 0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        let luma = frame.luma(Rect::new(0, 0, 3, 1)).unwrap();
        assert_eq!(luma, vec![76, 150, 29]);
    }

    #[test]
    fn bgr_and_rgba_match_rgb() {
        let rgb = Frame::new(1, 1, 1, PixelFormat::Rgb24, vec![10, 200, 40]).unwrap();
        let bgr = Frame::new(1, 1, 1, PixelFormat::Bgr24, vec![40, 200, 10]).unwrap();
        let rgba = Frame::new(1, 1, 1, PixelFormat::Rgba32, vec![10, 200, 40, 255]).unwrap();
        let rect = Rect::new(0, 0, 1, 1);
        assert_eq!(rgb.luma(rect).unwrap(), bgr.luma(rect).unwrap());
        assert_eq!(rgb.luma(rect).unwrap(), rgba.luma(rect).unwrap());
    }

    #[test]
    fn luma_region_outside_frame_is_an_error() {
        let frame = Frame::new(1, 4, 4, PixelFormat::Gray8, vec![0u8; 16]).unwrap();
        assert!(frame.luma(Rect::new(2, 2, 4, 4)).is_err());
    }

    #[test]
    fn scaling_preserves_aspect_ratio() {
        let frame = Frame::new(7, 640, 480, PixelFormat::Gray8, vec![128u8; 640 * 480]).unwrap();
        let scaled = frame.scaled_to_width(320).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (320, 240));
        assert_eq!(scaled.sequence(), 7);
        assert_eq!(scaled.data.len(), 320 * 240);
    }

    #[test]
    fn scaling_never_upscales() {
        let frame = Frame::new(1, 100, 50, PixelFormat::Rgb24, vec![0u8; 100 * 50 * 3]).unwrap();
        let scaled = frame.scaled_to_width(1280).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (100, 50));
    }

    #[test]
    fn restamp_keeps_pixels() {
        let frame = Frame::new(1, 2, 2, PixelFormat::Gray8, vec![1, 2, 3, 4]).unwrap();
        let again = frame.restamped(9);
        assert_eq!(again.sequence(), 9);
        assert_eq!(again.data, frame.data);
    }
}
