//! Pre-OCR image cleanup

use tracing::{debug, instrument};

use crate::capture::decoder::decode_to_rgb;
use crate::capture::{Frame, PixelFormat, Rect};
use crate::error::CaptureError;

/// Transforms an accepted frame before it is encoded and dispatched
pub trait Enhancer: Send + Sync {
    fn enhance(&self, frame: Frame) -> Result<Frame, CaptureError>;
}

/// Gaussian adaptive binarization.
///
/// A pixel turns black when it is not brighter than the Gaussian-weighted mean
/// of its `block_size x block_size` neighbourhood minus `c`, white otherwise.
/// The weights use `sigma = 0.3 * ((block_size - 1) / 2 - 1) + 0.8` and edge
/// pixels are replicated past the border. Embossed and dot-matrix print on
/// curved plastic survives this much better than a global threshold.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThreshold {
    /// Odd neighbourhood edge length in pixels
    pub block_size: u32,
    pub c: i32,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self { block_size: 11, c: 4 }
    }
}

impl AdaptiveThreshold {
    /// Binarize a row-major luma buffer.
    pub fn apply(&self, gray: &[u8], width: u32, height: u32) -> Vec<u8> {
        let (w, h) = (width as usize, height as usize);
        let kernel = gaussian_kernel(self.block_size);
        let radius = (kernel.len() / 2) as isize;

        // Separable blur: rows first, then columns over the row results.
        let mut rows = vec![0f32; w * h];
        for y in 0..h {
            let line = &gray[y * w..(y + 1) * w];
            for x in 0..w {
                rows[y * w + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| weight * f32::from(line[replicate(x as isize + k as isize - radius, w)]))
                    .sum();
            }
        }

        let mut out = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let mean: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| weight * rows[replicate(y as isize + k as isize - radius, h) * w + x])
                    .sum();
                let threshold = mean.round() as i32 - self.c;
                out[y * w + x] = if i32::from(gray[y * w + x]) > threshold { 255 } else { 0 };
            }
        }
        out
    }
}

impl Enhancer for AdaptiveThreshold {
    #[instrument(level = "debug", skip_all, fields(seq = frame.sequence()))]
    fn enhance(&self, frame: Frame) -> Result<Frame, CaptureError> {
        let frame = if frame.format().is_planar_rgb_or_gray() {
            frame
        } else {
            decode_to_rgb(&frame)?
        };

        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Ok(frame);
        }

        let gray = frame
            .luma(Rect::new(0, 0, width, height))
            .map_err(|e| CaptureError::InvalidFrame(e.to_string()))?;
        let binary = self.apply(&gray, width, height);
        debug!(width, height, block = self.block_size, c = self.c, "Binarized frame");

        frame.derived(width, height, PixelFormat::Gray8, binary)
    }
}

/// Normalised 1-D Gaussian of odd length `size`.
fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = 0.3 * ((size - 1) as f32 * 0.5 - 1.0) + 0.8;
    let radius = (size / 2) as i32;

    let weights = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect::<Vec<_>>();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

fn replicate(index: isize, len: usize) -> usize {
    index.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_turns_white() {
        // Every pixel equals its local mean, which beats mean - c.
        let out = AdaptiveThreshold::default().apply(&[90; 16 * 16], 16, 16);
        assert!(out.iter().all(|&p| p == 255));
    }

    #[test]
    fn dark_strokes_on_light_background_survive() {
        let (w, h) = (32u32, 16u32);
        let mut gray = vec![200u8; (w * h) as usize];
        for y in 4..12 {
            gray[(y * w + 16) as usize] = 40;
        }

        let out = AdaptiveThreshold::default().apply(&gray, w, h);
        assert_eq!(out[(8 * w + 16) as usize], 0);
        assert_eq!(out[(8 * w + 4) as usize], 255);
        assert_eq!(out.iter().filter(|&&p| p == 0).count(), 8);
    }

    #[test]
    fn kernel_matches_block_eleven_sigma_two() {
        let kernel = gaussian_kernel(11);
        assert_eq!(kernel.len(), 11);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        // exp(-1/8) between neighbours at sigma 2.
        assert!((kernel[6] / kernel[5] - (-0.125f32).exp()).abs() < 1e-5);
        assert_eq!(gaussian_kernel(1), vec![1.0]);
    }

    #[test]
    fn distant_neighbours_weigh_less_than_near_ones() {
        // A bright column five pixels away barely moves the mean; one pixel
        // away it pushes the neighbour below threshold.
        let (w, h) = (24u32, 12u32);
        let mut gray = vec![100u8; (w * h) as usize];
        for y in 0..h {
            gray[(y * w + 15) as usize] = 255;
        }

        let out = AdaptiveThreshold::default().apply(&gray, w, h);
        assert_eq!(out[(6 * w + 10) as usize], 255);
        assert_eq!(out[(6 * w + 14) as usize], 0);
        assert_eq!(out[(6 * w + 15) as usize], 255);
    }

    #[test]
    fn borders_replicate_edge_pixels() {
        // Dark first column: replicated outward it dominates its own mean.
        let (w, h) = (16u32, 4u32);
        let gray = (0..h)
            .flat_map(|_| (0..w).map(|x| if x == 0 { 40u8 } else { 200u8 }))
            .collect::<Vec<_>>();

        let out = AdaptiveThreshold::default().apply(&gray, w, h);
        for y in 0..h {
            assert_eq!(out[(y * w) as usize], 0);
            assert_eq!(out[(y * w + 1) as usize], 255);
        }
    }

    #[test]
    fn uneven_lighting_is_normalised() {
        // Left half dim, right half bright, each with one dark dot.
        let (w, h) = (40u32, 20u32);
        let mut gray = (0..h)
            .flat_map(|_| (0..w).map(|x| if x < 20 { 60u8 } else { 220u8 }))
            .collect::<Vec<_>>();
        gray[(10 * w + 8) as usize] = 20;
        gray[(10 * w + 30) as usize] = 150;

        let out = AdaptiveThreshold::default().apply(&gray, w, h);
        assert_eq!(out[(10 * w + 8) as usize], 0);
        assert_eq!(out[(10 * w + 30) as usize], 0);
        assert_eq!(out[(2 * w + 2) as usize], 255);
        assert_eq!(out[(2 * w + 37) as usize], 255);
    }

    #[test]
    fn enhance_outputs_gray_frame_with_same_identity() {
        let frame = Frame::new(7, 4, 4, PixelFormat::Rgb24, vec![180; 4 * 4 * 3]).unwrap();
        let out = AdaptiveThreshold::default().enhance(frame.clone()).unwrap();
        assert_eq!(out.format(), PixelFormat::Gray8);
        assert_eq!((out.width(), out.height()), (4, 4));
        assert_eq!(out.sequence(), 7);
        assert_eq!(out.timestamp, frame.timestamp);
    }
}
