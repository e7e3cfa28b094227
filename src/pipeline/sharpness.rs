//! Variance-of-Laplacian focus metric
//!
//! In-focus edges give a strong second-derivative response, so the variance of
//! the Laplacian-filtered intensity rises with sharpness. The same scorer runs
//! on the low-resolution analysis frames and on the full-resolution burst shots.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::capture::{Frame, Rect};
use crate::error::CaptureError;

/// Sub-rectangle of a frame to score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegionOfInterest {
    /// Centered band covering the given fraction of width and height.
    Centered {
        width_fraction: f64,
        height_fraction: f64,
    },
    /// Explicit pixel rectangle.
    Pixels(Rect),
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        RegionOfInterest::Centered {
            width_fraction: 0.8,
            height_fraction: 0.5,
        }
    }
}

impl RegionOfInterest {
    /// Resolve against a `width` x `height` frame.
    ///
    /// `None` when the region is empty or does not fit inside the frame.
    pub fn resolve(&self, width: u32, height: u32) -> Option<Rect> {
        let rect = match *self {
            RegionOfInterest::Centered {
                width_fraction,
                height_fraction,
            } => {
                let valid = |f: f64| f.is_finite() && f > 0.0 && f <= 1.0;
                if !valid(width_fraction) || !valid(height_fraction) {
                    return None;
                }
                let (w, h) = (f64::from(width), f64::from(height));
                let (roi_w, roi_h) = (w * width_fraction, h * height_fraction);
                Rect::new(
                    ((w - roi_w) / 2.0) as u32,
                    ((h - roi_h) / 2.0) as u32,
                    roi_w as u32,
                    roi_h as u32,
                )
            }
            RegionOfInterest::Pixels(rect) => rect,
        };

        rect.fits_within(width, height).then_some(rect)
    }
}

impl From<Rect> for RegionOfInterest {
    fn from(rect: Rect) -> Self {
        RegionOfInterest::Pixels(rect)
    }
}

/// Scalar focus metric for a frame region. Higher = sharper.
pub trait SharpnessScorer: Send + Sync {
    fn score(&self, frame: &Frame, roi: Option<&RegionOfInterest>) -> Result<f64, CaptureError>;
}

/// 3x3 Laplacian `[0 1 0; 1 -4 1; 0 1 0]` with reflect-101 borders
#[derive(Debug, Clone, Copy, Default)]
pub struct LaplacianScorer;

impl SharpnessScorer for LaplacianScorer {
    #[instrument(level = "trace", skip_all, fields(seq = frame.sequence()))]
    fn score(&self, frame: &Frame, roi: Option<&RegionOfInterest>) -> Result<f64, CaptureError> {
        let full = Rect::new(0, 0, frame.width(), frame.height());
        if !full.fits_within(frame.width(), frame.height()) {
            return Ok(0.0);
        }

        let rect = match roi {
            None => full,
            Some(roi) => match roi.resolve(frame.width(), frame.height()) {
                Some(rect) => rect,
                None => {
                    warn!(
                        ?roi,
                        width = frame.width(),
                        height = frame.height(),
                        "Region of interest outside frame, scoring full frame"
                    );
                    full
                }
            },
        };

        let luma = frame.luma(rect)?;
        Ok(laplacian_variance(&luma, rect.width as usize, rect.height as usize))
    }
}

/// Population variance of the Laplacian response over a row-major plane.
pub fn laplacian_variance(luma: &[u8], width: usize, height: usize) -> f64 {
    if width == 0 || height == 0 || luma.len() < width * height {
        return 0.0;
    }

    let at = |x: isize, y: isize| -> f64 {
        let x = reflect101(x, width);
        let y = reflect101(y, height);
        f64::from(luma[y * width + x])
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let response = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let count = (width * height) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

// gfedcb|abcdefgh|gfedcba
fn reflect101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i.abs();
    if i > last {
        i = 2 * last - i;
    }
    i.clamp(0, last) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    fn gray_frame(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> Frame {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(pixel(x, y));
            }
        }
        Frame::new(1, width, height, PixelFormat::Gray8, data).unwrap()
    }

    fn checkerboard(width: u32, height: u32) -> Frame {
        gray_frame(width, height, |x, y| if (x + y) % 2 == 0 { 0 } else { 255 })
    }

    #[test]
    fn checkerboard_scores_high() {
        let score = LaplacianScorer.score(&checkerboard(64, 48), None).unwrap();
        assert!(score > 1000.0, "checkerboard should be sharp, got {score}");
    }

    #[test]
    fn uniform_frame_scores_zero() {
        let frame = gray_frame(64, 48, |_, _| 128);
        assert_eq!(LaplacianScorer.score(&frame, None).unwrap(), 0.0);
    }

    #[test]
    fn smooth_gradient_scores_below_edges() {
        let gradient = gray_frame(64, 48, |x, _| (x * 4) as u8);
        let edges = gray_frame(64, 48, |x, _| if (x / 4) % 2 == 0 { 0 } else { 255 });
        let soft = LaplacianScorer.score(&gradient, None).unwrap();
        let hard = LaplacianScorer.score(&edges, None).unwrap();
        assert!(hard > soft * 10.0, "edges {hard} vs gradient {soft}");
    }

    #[test]
    fn centered_roi_matches_default_band() {
        let rect = RegionOfInterest::default().resolve(320, 240).unwrap();
        assert_eq!(rect, Rect::new(32, 60, 256, 120));
    }

    #[test]
    fn roi_only_sees_its_region() {
        // Sharp content only outside the centered band.
        let frame = gray_frame(100, 100, |x, y| {
            let inside = (10..90).contains(&x) && (25..75).contains(&y);
            if inside || (x + y) % 2 == 0 { 128 } else { 0 }
        });
        let roi = RegionOfInterest::default();
        let banded = LaplacianScorer.score(&frame, Some(&roi)).unwrap();
        let full = LaplacianScorer.score(&frame, None).unwrap();
        assert!(banded < 1.0, "inner band is flat, got {banded}");
        assert!(full > banded);
    }

    #[test]
    fn out_of_bounds_roi_falls_back_to_full_frame() {
        let frame = checkerboard(32, 32);
        let roi = RegionOfInterest::Pixels(Rect::new(30, 30, 10, 10));
        let fallback = LaplacianScorer.score(&frame, Some(&roi)).unwrap();
        let full = LaplacianScorer.score(&frame, None).unwrap();
        assert!(fallback.is_finite() && fallback >= 0.0);
        assert_eq!(fallback, full);
    }

    #[test]
    fn invalid_fractions_fall_back_to_full_frame() {
        let frame = checkerboard(16, 16);
        let full = LaplacianScorer.score(&frame, None).unwrap();
        for (w, h) in [(0.0, 0.5), (1.5, 0.5), (f64::NAN, 0.5), (-0.2, 0.4)] {
            let roi = RegionOfInterest::Centered {
                width_fraction: w,
                height_fraction: h,
            };
            let score = LaplacianScorer.score(&frame, Some(&roi)).unwrap();
            assert_eq!(score, full);
        }
    }

    #[test]
    fn tiny_and_empty_frames_do_not_panic() {
        let one = gray_frame(1, 1, |_, _| 200);
        assert_eq!(LaplacianScorer.score(&one, None).unwrap(), 0.0);
        let empty = Frame::new(1, 0, 0, PixelFormat::Gray8, Vec::new()).unwrap();
        assert_eq!(LaplacianScorer.score(&empty, None).unwrap(), 0.0);
    }

    #[test]
    fn compressed_frames_fail_to_score() {
        let frame = Frame::new(1, 8, 8, PixelFormat::Mjpeg, vec![0xff, 0xd8]).unwrap();
        assert!(matches!(
            LaplacianScorer.score(&frame, None),
            Err(CaptureError::Scoring(_))
        ));
    }

    #[test]
    fn colour_and_gray_frames_agree() {
        let gray = checkerboard(16, 16);
        let rgb_data: Vec<u8> = gray.data.iter().flat_map(|&v| [v, v, v]).collect();
        let rgb = Frame::new(1, 16, 16, PixelFormat::Rgb24, rgb_data).unwrap();
        assert_eq!(
            LaplacianScorer.score(&gray, None).unwrap(),
            LaplacianScorer.score(&rgb, None).unwrap()
        );
    }

    #[test]
    fn reflect101_mirrors_without_repeating_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-1, 1), 0);
        assert_eq!(reflect101(2, 2), 0);
    }
}
