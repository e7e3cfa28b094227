//! V4L2 camera source with memory-mapped buffers

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::FrameSource;
use crate::error::CaptureError;
use crate::CameraConfig;

/// Live camera capture through V4L2
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CameraConfig,
    sequence: u64,
}

impl V4l2Capture {
    pub fn new(config: CameraConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device).map_err(source_err)?;

        let caps = device.query_caps().map_err(source_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Source(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format().map_err(source_err)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => {
                return Err(CaptureError::Source(format!(
                    "unsupported camera pixel format {:?}",
                    other
                )))
            }
        };
        let fmt = device.set_format(&fmt).map_err(source_err)?;

        // The driver may settle on a different size than requested.
        let config = CameraConfig {
            width: fmt.width,
            height: fmt.height,
            ..config
        };

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            sequence: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)
                .map_err(source_err)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    /// Dequeue one raw frame in the negotiated camera format
    #[instrument(skip(self))]
    pub fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let stream = self.stream.as_mut().ok_or(CaptureError::NotReady)?;
        let (buf, meta) = stream.next().map_err(source_err)?;
        let data = Bytes::copy_from_slice(&buf[..meta.bytesused as usize]);

        self.sequence += 1;

        let bpp = self.config.format.bytes_per_pixel().unwrap_or(0);
        let frame_meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: self.config.width,
            height: self.config.height,
            stride: self.config.width * bpp,
            format: self.config.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        });

        Ok(Frame {
            data,
            meta: frame_meta,
            timestamp,
        })
    }
}

impl FrameSource for V4l2Capture {
    fn grab(&mut self, max_width: u32) -> Result<Frame, CaptureError> {
        let raw = self.capture_frame()?;
        decoder::decode_to_rgb(&raw)?.scaled_to_width(max_width)
    }
}

/// Find the first capture-capable device, preferring MJPEG over YUYV
pub fn auto_detect_device() -> Result<(String, PixelFormat), CaptureError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            warn!("Could not open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else { continue };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            for fmt in formats {
                if fmt.fourcc == FourCC::new(b"MJPG") {
                    info!("Found MJPEG device: {} - {}", path, caps.card);
                    return Ok((path, PixelFormat::Mjpeg));
                } else if fmt.fourcc == FourCC::new(b"YUYV") {
                    info!("Found YUYV device: {} - {}", path, caps.card);
                    return Ok((path, PixelFormat::Yuyv4));
                }
            }
        }
    }

    Err(CaptureError::Source("no suitable capture device found".into()))
}

fn source_err(err: std::io::Error) -> CaptureError {
    CaptureError::Source(err.to_string())
}
