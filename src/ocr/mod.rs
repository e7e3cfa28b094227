//! OCR hand-off for accepted frames
//!
//! The capture pipeline only knows [`OcrDispatcher`]. Each provider module
//! turns an [`EncodedImage`] into an HTTP exchange and normalizes the answer
//! into [`ExtractedText`].

pub mod azure;
pub mod google;
pub mod openai;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use azure::AzureReadDispatcher;
pub use google::GoogleVisionDispatcher;
pub use openai::{LabelReading, OpenAiDispatcher};

use crate::capture::decoder::decode_to_rgb;
use crate::capture::{Frame, PixelFormat};
use crate::error::{CaptureError, DispatchError};
use crate::{OcrConfig, OcrProvider};

/// A compressed image ready for upload
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Bytes,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// JPEG-encode a frame. Grayscale frames stay single-channel.
    pub fn jpeg(frame: &Frame, quality: u8) -> Result<Self, CaptureError> {
        let (data, color) = match frame.format() {
            PixelFormat::Gray8 if frame.meta.stride == frame.width() => (frame.data.clone(), ExtendedColorType::L8),
            _ => (decode_to_rgb(frame)?.data, ExtendedColorType::Rgb8),
        };

        let mut out = Cursor::new(Vec::with_capacity(data.len() / 8));
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
            &data,
            frame.width(),
            frame.height(),
            color,
        )?;

        Ok(Self {
            bytes: Bytes::from(out.into_inner()),
            mime: "image/jpeg",
            width: frame.width(),
            height: frame.height(),
        })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

/// Text recovered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub provider: String,
    pub text: String,
    /// Provider-specific structured fields, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExtractedText {
    pub fn plain(provider: &str, text: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            text: text.into(),
            details: None,
        }
    }
}

/// Receives the accepted frame once the user confirms it
#[async_trait]
pub trait OcrDispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, image: &EncodedImage) -> Result<ExtractedText, DispatchError>;
}

/// Build the dispatcher selected by `config.provider`; `None` disables OCR.
pub fn build_dispatcher(config: &OcrConfig) -> Result<Option<Arc<dyn OcrDispatcher>>, DispatchError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let dispatcher: Arc<dyn OcrDispatcher> = match config.provider {
        OcrProvider::None => return Ok(None),
        OcrProvider::Google => Arc::new(GoogleVisionDispatcher::new(&config.google, timeout)?),
        OcrProvider::Azure => Arc::new(AzureReadDispatcher::new(&config.azure, timeout)?),
        OcrProvider::OpenAi => Arc::new(OpenAiDispatcher::new(&config.openai, timeout)?),
    };
    info!(provider = dispatcher.name(), "OCR dispatcher ready");
    Ok(Some(dispatcher))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, DispatchError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn require_key(provider: &str, key: &str) -> Result<String, DispatchError> {
    if key.trim().is_empty() {
        return Err(DispatchError::NotConfigured(format!("{provider} API key is not set")));
    }
    Ok(key.to_string())
}

/// Turn a non-success response into [`DispatchError::Status`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DispatchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_encoding_keeps_dimensions() {
        let data = (0..64 * 32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let frame = Frame::new(1, 64, 32, PixelFormat::Gray8, data).unwrap();
        let image = EncodedImage::jpeg(&frame, 90).unwrap();

        assert_eq!((image.width, image.height), (64, 32));
        assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&image.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn colour_frames_encode_as_rgb() {
        let frame = Frame::new(1, 8, 8, PixelFormat::Rgba32, vec![200; 8 * 8 * 4]).unwrap();
        let image = EncodedImage::jpeg(&frame, 90).unwrap();
        let decoded = image::load_from_memory(&image.bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn data_url_has_mime_prefix() {
        let image = EncodedImage {
            bytes: Bytes::from_static(b"abc"),
            mime: "image/jpeg",
            width: 1,
            height: 1,
        };
        assert_eq!(image.to_base64(), "YWJj");
        assert_eq!(image.data_url(), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn provider_none_disables_dispatch() {
        assert!(build_dispatcher(&OcrConfig::default()).unwrap().is_none());
    }

    #[test]
    fn missing_key_is_reported() {
        let config = OcrConfig {
            provider: OcrProvider::Google,
            ..OcrConfig::default()
        };
        assert!(matches!(build_dispatcher(&config), Err(DispatchError::NotConfigured(_))));
    }
}
