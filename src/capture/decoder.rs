use image::ImageFormat;

use super::frame::{Frame, PixelFormat};
use crate::error::CaptureError;

/// Decode a tightly packed buffer into RGB24 pixels.
pub fn decode_frame(data: &[u8], format: PixelFormat) -> Result<Vec<u8>, CaptureError> {
    match format {
        PixelFormat::Mjpeg => {
            let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
            Ok(image.to_rgb8().into_raw())
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            Ok(data.to_vec())
        }
        PixelFormat::Bgr24 => Ok(data
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect()),
        PixelFormat::Rgba32 => Ok(data
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect()),
        PixelFormat::Gray8 => Ok(data.iter().flat_map(|&v| [v, v, v]).collect()),
        PixelFormat::Yuyv4 => {
            if data.len() % 4 != 0 {
                return Err(CaptureError::InvalidFrame(format!(
                    "YUYV buffer length {} is not a multiple of 4",
                    data.len()
                )));
            }
            let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
            for macro_pixel in data.chunks_exact(4) {
                let (y0, u, y1, v) = (macro_pixel[0], macro_pixel[1], macro_pixel[2], macro_pixel[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            Ok(rgb)
        }
    }
}

/// Decode any frame into an RGB24 frame with the same sequence and timestamp.
pub fn decode_to_rgb(frame: &Frame) -> Result<Frame, CaptureError> {
    if frame.format() == PixelFormat::Rgb24 && frame.meta.stride == frame.width() * 3 {
        return Ok(frame.clone());
    }

    if frame.format() == PixelFormat::Mjpeg {
        // Dimensions come from the bitstream, not the negotiated format.
        let image = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)?.to_rgb8();
        let (width, height) = image.dimensions();
        return frame.derived(width, height, PixelFormat::Rgb24, image.into_raw());
    }

    let bpp = frame.format().bytes_per_pixel().unwrap_or(1) as usize;
    let row_len = frame.width() as usize * bpp;
    let stride = frame.meta.stride as usize;
    let packed: Vec<u8> = if stride == row_len {
        frame.data.to_vec()
    } else {
        (0..frame.height() as usize)
            .map(|y| frame.data.get(y * stride..y * stride + row_len))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CaptureError::InvalidFrame("buffer shorter than stride".into()))?
            .concat()
    };

    let rgb = decode_frame(&packed, frame.format())?;
    frame.derived(frame.width(), frame.height(), PixelFormat::Rgb24, rgb)
}

// BT.601 limited range
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_levels() {
        // Black and white pixels sharing neutral chroma.
        let rgb = decode_frame(&[16, 128, 235, 128], PixelFormat::Yuyv4).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn yuyv_rejects_partial_macro_pixel() {
        assert!(decode_frame(&[16, 128, 235], PixelFormat::Yuyv4).is_err());
    }

    #[test]
    fn bgr_swaps_channels() {
        let rgb = decode_frame(&[1, 2, 3], PixelFormat::Bgr24).unwrap();
        assert_eq!(rgb, vec![3, 2, 1]);
    }

    #[test]
    fn mjpeg_round_trips_through_image() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode_image(&img)
            .unwrap();

        let frame = Frame::new(3, 0, 0, PixelFormat::Mjpeg, jpeg).unwrap();
        let decoded = decode_to_rgb(&frame).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        assert_eq!(decoded.format(), PixelFormat::Rgb24);
        assert_eq!(decoded.sequence(), 3);
    }

    #[test]
    fn gray_expands_to_rgb() {
        let frame = Frame::new(1, 2, 1, PixelFormat::Gray8, vec![7, 9]).unwrap();
        let decoded = decode_to_rgb(&frame).unwrap();
        assert_eq!(&decoded.data[..], &[7, 7, 7, 9, 9, 9]);
    }
}
