pub mod capture;
pub mod enhance;
pub mod error;
pub mod ocr;
pub mod pipeline;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use capture::{Frame, FrameSource, PixelFormat};
pub use error::{CaptureError, DispatchError};
pub use pipeline::{CaptureController, CaptureDriver, Command, Event, Input, Outcome, Phase};

use crate::pipeline::sharpness::RegionOfInterest;

/// Environment variables override file values, e.g. `DOCSNAP__CAPTURE__BURST_COUNT=5`.
pub const ENV_PREFIX: &str = "DOCSNAP";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub camera: CameraConfig,
    pub ocr: OcrConfig,
}

/// Monitoring and burst tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub tick_interval_ms: u64,
    /// Width of the frames scored on every monitoring tick
    pub analysis_width: u32,
    /// Width of the burst shots
    pub capture_width: u32,
    pub sharpness_threshold: f64,
    pub burst_count: u32,
    pub burst_delay_ms: u64,
    pub roi_width_fraction: f64,
    pub roi_height_fraction: f64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Stable while `|x| + |y| + |z|` stays below this
    pub stability_threshold: f64,
}

/// Live camera settings, used by the `v4l2` source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OcrProvider {
    #[default]
    None,
    Google,
    Azure,
    #[value(name = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub provider: OcrProvider,
    /// Binarize the accepted frame before dispatch
    pub enhance: bool,
    pub timeout_secs: u64,
    pub google: GoogleVisionConfig,
    pub azure: AzureReadConfig,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleVisionConfig {
    pub endpoint: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureReadConfig {
    /// Resource endpoint, e.g. `https://<name>.cognitiveservices.azure.com/`
    pub endpoint: String,
    pub analyze_path: String,
    pub api_key: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            analysis_width: 320,
            capture_width: 1280,
            sharpness_threshold: 150.0,
            burst_count: 3,
            burst_delay_ms: 100,
            roi_width_fraction: 0.8,
            roi_height_fraction: 0.5,
            jpeg_quality: 90,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 1.0,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 1280,
            height: 720,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: OcrProvider::None,
            enhance: false,
            timeout_secs: 30,
            google: GoogleVisionConfig::default(),
            azure: AzureReadConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl Default for GoogleVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".into(),
            api_key: String::new(),
        }
    }
}

impl Default for AzureReadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            analyze_path: "vision/v3.2/read/analyze".into(),
            api_key: String::new(),
            poll_interval_ms: 500,
            max_polls: 60,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key: String::new(),
            model: "gpt-4o".into(),
            max_tokens: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn burst_delay(&self) -> Duration {
        Duration::from_millis(self.burst_delay_ms)
    }

    pub fn region_of_interest(&self) -> RegionOfInterest {
        RegionOfInterest::Centered {
            width_fraction: self.roi_width_fraction,
            height_fraction: self.roi_height_fraction,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `DOCSNAP__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, CaptureError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        let capture = &self.capture;
        let fail = |msg: &str| Err(CaptureError::Config(msg.to_string()));

        if capture.tick_interval_ms == 0 {
            return fail("capture.tick_interval_ms must be positive");
        }
        if capture.analysis_width == 0 || capture.capture_width == 0 {
            return fail("capture widths must be positive");
        }
        if capture.burst_count == 0 {
            return fail("capture.burst_count must be at least 1");
        }
        if !capture.sharpness_threshold.is_finite() || capture.sharpness_threshold < 0.0 {
            return fail("capture.sharpness_threshold must be a non-negative number");
        }
        if !(1..=100).contains(&capture.jpeg_quality) {
            return fail("capture.jpeg_quality must be within 1..=100");
        }
        let stability = self.motion.stability_threshold;
        if !stability.is_finite() || stability < 0.0 {
            return fail("motion.stability_threshold must be a non-negative number");
        }
        if self.ocr.azure.poll_interval_ms == 0 && self.ocr.provider == OcrProvider::Azure {
            return fail("ocr.azure.poll_interval_ms must be positive");
        }
        Ok(())
    }
}
