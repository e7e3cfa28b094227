//! docsnap: wait for a sharp, steady view of a label, keep the best shot and read it

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use flume::{bounded, unbounded, Sender};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use docsnap::capture::{FrameSource, StillFrameSource};
use docsnap::enhance::AdaptiveThreshold;
use docsnap::ocr;
use docsnap::pipeline::FixedMotionSource;
use docsnap::utils;
use docsnap::{CaptureController, CaptureDriver, CaptureError, Config, Input, OcrProvider, Outcome};

#[derive(Debug, Parser)]
#[command(name = "docsnap", version, about)]
struct Cli {
    /// Images or directories replayed as the camera stream
    #[arg(value_name = "IMAGE")]
    images: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OCR provider, overrides the configuration
    #[arg(long, value_enum)]
    provider: Option<OcrProvider>,

    /// Binarize the accepted frame before OCR
    #[arg(long)]
    enhance: bool,

    /// Save accepted frames into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Accept the first burst winner without asking
    #[arg(long)]
    auto_accept: bool,

    /// Capture from the configured V4L2 camera instead of still images
    #[cfg(feature = "v4l2")]
    #[arg(long)]
    camera: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("docsnap=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    info!("docsnap launching...");

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.ocr.provider = provider;
    }
    config.ocr.enhance |= cli.enhance;

    let source = open_source(&cli, &config)?;
    let controller = CaptureController::new(&config, source, Box::new(FixedMotionSource::stationary()));
    let dispatcher = ocr::build_dispatcher(&config.ocr)?;
    let has_dispatcher = dispatcher.is_some();

    let (input_tx, input_rx) = unbounded::<Input>();
    let (outcome_tx, outcome_rx) = bounded::<Outcome>(64);

    let mut driver = CaptureDriver::new(controller, input_rx, outcome_tx);
    if config.ocr.enhance {
        driver = driver.with_enhancer(Box::new(AdaptiveThreshold::default()));
    }
    if let Some(dispatcher) = dispatcher {
        driver = driver.with_dispatcher(dispatcher);
    }
    let driver_handle = tokio::spawn(driver.run());

    spawn_ctrl_c(input_tx.clone());
    if !cli.auto_accept {
        spawn_stdin(input_tx.clone());
    }
    input_tx.send(Input::Start)?;

    while let Ok(outcome) = outcome_rx.recv_async().await {
        match outcome {
            Outcome::PhaseChanged(phase) => info!(%phase, "Phase"),
            Outcome::Sharpness { score, stable } => {
                info!(score = %format!("{score:.1}"), stable, "Sharpness");
            }
            Outcome::Preview(decision) => {
                println!(
                    "Best shot #{} ({}x{}) scored {:.1}",
                    decision.frame.sequence(),
                    decision.frame.width(),
                    decision.frame.height(),
                    decision.score
                );
                if cli.auto_accept {
                    input_tx.send(Input::Accept)?;
                } else {
                    println!("[a]ccept, [r]etry or [q]uit?");
                }
            }
            Outcome::Accepted { decision, image } => {
                if let Some(dir) = &cli.output {
                    let path = utils::save_capture(dir, "capture", decision.frame.sequence(), &image.bytes)?;
                    println!("Saved {}", path.display());
                }
                if !has_dispatcher {
                    finish(&input_tx, cli.auto_accept)?;
                }
            }
            Outcome::Extracted(text) => {
                println!("--- {} ---\n{}", text.provider, text.text);
                if let Some(details) = &text.details {
                    println!("{}", serde_json::to_string_pretty(details)?);
                }
                finish(&input_tx, cli.auto_accept)?;
            }
            Outcome::DispatchFailed { error, decision } => {
                error!(error = %error, seq = decision.frame.sequence(), "Text extraction failed");
                finish(&input_tx, cli.auto_accept)?;
            }
            Outcome::Rejected(e) => {
                warn!(error = %e, "Request rejected");
                if matches!(e, CaptureError::PermissionDenied) {
                    input_tx.send(Input::Shutdown)?;
                }
            }
            Outcome::Stopped => break,
        }
    }

    driver_handle.await?;
    info!("docsnap shutting down");
    Ok(())
}

fn open_source(cli: &Cli, config: &Config) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "v4l2")]
    if cli.camera {
        let mut camera_config = config.camera.clone();
        if camera_config.device.is_empty() {
            let (device, format) = docsnap::capture::v4l2::auto_detect_device()?;
            camera_config.device = device;
            camera_config.format = format;
        }
        info!("Using capture device: {}", camera_config.device);
        let mut camera = docsnap::capture::V4l2Capture::new(camera_config)?;
        camera.start_stream()?;
        return Ok(Box::new(camera));
    }

    #[cfg(not(feature = "v4l2"))]
    let _ = config;

    let paths = utils::collect_image_paths(&cli.images)?;
    Ok(Box::new(StillFrameSource::open(&paths)?))
}

/// Monitoring stops after one result when unattended; otherwise ask again.
fn finish(inputs: &Sender<Input>, auto_accept: bool) -> Result<()> {
    if auto_accept {
        inputs.send(Input::Shutdown)?;
    } else {
        println!("Capture done. [s]tart again or [q]uit?");
    }
    Ok(())
}

fn spawn_ctrl_c(inputs: Sender<Input>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = inputs.send_async(Input::Shutdown).await;
        }
    });
}

fn spawn_stdin(inputs: Sender<Input>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let input = match line.trim().to_ascii_lowercase().as_str() {
                "a" | "accept" => Input::Accept,
                "r" | "retry" => Input::Retry,
                "s" | "start" => Input::Start,
                "stop" => Input::Stop,
                "q" | "quit" => Input::Shutdown,
                "" => continue,
                other => {
                    println!("Unknown command: {other}");
                    continue;
                }
            };
            if inputs.send_async(input).await.is_err() {
                return;
            }
        }
        let _ = inputs.send_async(Input::Shutdown).await;
    });
}
