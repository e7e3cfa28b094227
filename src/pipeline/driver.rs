//! Async host for the capture state machine
//!
//! The driver owns the only timers in the pipeline: the monitoring ticker and
//! the inter-shot sleep of a burst. It turns user inputs and timer expiries
//! into [`Event`]s, executes the returned [`Command`]s and reports what
//! happened on the outcome channel.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use super::controller::{CaptureController, Command, Event};
use super::motion::MotionSample;
use super::preview::Decision;
use super::session::Phase;
use crate::enhance::Enhancer;
use crate::error::{CaptureError, DispatchError};
use crate::ocr::{EncodedImage, ExtractedText, OcrDispatcher};

/// Requests from the user or the host platform
#[derive(Debug, Clone)]
pub enum Input {
    Start,
    Stop,
    Accept,
    Retry,
    Motion(MotionSample),
    /// Stop the driver loop
    Shutdown,
}

/// Everything the driver reports back to the host
#[derive(Debug)]
pub enum Outcome {
    PhaseChanged(Phase),
    Sharpness { score: f64, stable: bool },
    /// Burst winner awaiting accept/retry
    Preview(Decision),
    /// Accepted frame, encoded as it will be submitted
    Accepted { decision: Decision, image: EncodedImage },
    Extracted(ExtractedText),
    /// The decision is handed back so the caller can resubmit it.
    DispatchFailed { error: DispatchError, decision: Decision },
    /// An input the controller could not act on
    Rejected(CaptureError),
    Stopped,
}

type ShotTimer = Option<Pin<Box<Sleep>>>;

pub struct CaptureDriver {
    controller: CaptureController,
    inputs: Receiver<Input>,
    outcomes: Sender<Outcome>,
    enhancer: Option<Box<dyn Enhancer>>,
    dispatcher: Option<Arc<dyn OcrDispatcher>>,
}

impl CaptureDriver {
    pub fn new(controller: CaptureController, inputs: Receiver<Input>, outcomes: Sender<Outcome>) -> Self {
        Self {
            controller,
            inputs,
            outcomes,
            enhancer: None,
            dispatcher: None,
        }
    }

    /// Preprocess accepted frames before they are encoded.
    pub fn with_enhancer(mut self, enhancer: Box<dyn Enhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn OcrDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    /// Run until [`Input::Shutdown`] arrives or every input sender is dropped.
    pub async fn run(mut self) -> CaptureController {
        let mut ticker: Option<Interval> = None;
        let mut shot: ShotTimer = None;

        info!(
            dispatcher = self.dispatcher.as_ref().map(|d| d.name()).unwrap_or("none"),
            enhance = self.enhancer.is_some(),
            "Capture driver running"
        );

        loop {
            let event = tokio::select! {
                input = self.inputs.recv_async() => match input {
                    Ok(Input::Start) => Event::Start,
                    Ok(Input::Stop) => Event::Stop,
                    Ok(Input::Accept) => Event::Accept,
                    Ok(Input::Retry) => Event::Retry,
                    Ok(Input::Motion(sample)) => Event::Motion(sample),
                    Ok(Input::Shutdown) | Err(_) => break,
                },
                _ = next_tick(&mut ticker) => Event::Tick,
                _ = shot_due(&mut shot) => Event::ShotDue,
            };

            if matches!(event, Event::ShotDue) {
                shot = None;
            }
            self.process(event, &mut ticker, &mut shot).await;
        }

        self.controller.shutdown();
        self.report_transitions().await;
        self.emit(Outcome::Stopped).await;
        info!("Capture driver stopped");
        self.controller
    }

    async fn process(&mut self, event: Event, ticker: &mut Option<Interval>, shot: &mut ShotTimer) {
        let result = self.controller.handle(event);
        self.report_transitions().await;

        let commands = match result {
            Ok(commands) => commands,
            Err(e) => {
                warn!(error = %e, "Event rejected");
                self.emit(Outcome::Rejected(e)).await;
                return;
            }
        };

        for command in commands {
            self.execute(command, ticker, shot).await;
        }
    }

    async fn execute(&mut self, command: Command, ticker: &mut Option<Interval>, shot: &mut ShotTimer) {
        match command {
            Command::StartTicker(period) => {
                *ticker = Some(monitoring_interval(period));
            }
            Command::StopTicker => {
                *ticker = None;
            }
            Command::ScheduleShot(delay) => {
                *shot = Some(Box::pin(sleep(delay)));
            }
            Command::Sharpness { score, stable } => {
                self.emit(Outcome::Sharpness { score, stable }).await;
            }
            Command::Present(decision) => {
                self.emit(Outcome::Preview(decision)).await;
            }
            Command::Dispatch(decision) => {
                self.dispatch(decision).await;
            }
        }
    }

    async fn dispatch(&mut self, decision: Decision) {
        let image = match self.prepare(&decision) {
            Ok(image) => image,
            Err(e) => {
                error!(error = %e, "Failed to prepare accepted frame");
                self.emit(Outcome::Rejected(e)).await;
                return;
            }
        };

        self.emit(Outcome::Accepted {
            decision: decision.clone(),
            image: image.clone(),
        })
        .await;

        let Some(dispatcher) = self.dispatcher.clone() else {
            debug!("No OCR dispatcher configured");
            return;
        };

        let started = Instant::now();
        match dispatcher.submit(&image).await {
            Ok(text) => {
                metrics::histogram!("docsnap_dispatch_ms").record(started.elapsed().as_secs_f64() * 1000.0);
                info!(
                    provider = dispatcher.name(),
                    chars = text.text.len(),
                    "Text extracted"
                );
                self.emit(Outcome::Extracted(text)).await;
            }
            Err(error) => {
                metrics::counter!("docsnap_dispatch_failures_total").increment(1);
                error!(provider = dispatcher.name(), error = %error, "OCR dispatch failed");
                self.emit(Outcome::DispatchFailed { error, decision }).await;
            }
        }
    }

    fn prepare(&self, decision: &Decision) -> Result<EncodedImage, CaptureError> {
        let frame = match &self.enhancer {
            Some(enhancer) => enhancer.enhance(decision.frame.clone())?,
            None => decision.frame.clone(),
        };
        EncodedImage::jpeg(&frame, self.controller.config().jpeg_quality)
    }

    async fn report_transitions(&mut self) {
        for phase in self.controller.take_transitions() {
            self.emit(Outcome::PhaseChanged(phase)).await;
        }
    }

    async fn emit(&mut self, outcome: Outcome) {
        if self.outcomes.send_async(outcome).await.is_err() {
            debug!("Outcome receiver dropped");
        }
    }
}

/// First tick fires one full period after start.
fn monitoring_interval(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn shot_due(shot: &mut ShotTimer) {
    match shot {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, PixelFormat, StillFrameSource};
    use crate::pipeline::motion::FixedMotionSource;
    use crate::Config;

    fn checkerboard(width: u32, height: u32) -> Frame {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 }))
            .collect::<Vec<u8>>();
        Frame::new(0, width, height, PixelFormat::Gray8, data).unwrap()
    }

    fn flat(width: u32, height: u32) -> Frame {
        Frame::new(0, width, height, PixelFormat::Gray8, vec![128; (width * height) as usize]).unwrap()
    }

    fn driver(frames: Vec<Frame>) -> (CaptureDriver, Sender<Input>, Receiver<Outcome>) {
        let controller = CaptureController::new(
            &Config::default(),
            Box::new(StillFrameSource::from_frames(frames)),
            Box::new(FixedMotionSource::stationary()),
        );
        let (input_tx, input_rx) = flume::unbounded();
        let (outcome_tx, outcome_rx) = flume::unbounded();
        (CaptureDriver::new(controller, input_rx, outcome_tx), input_tx, outcome_rx)
    }

    async fn next_preview(outcomes: &Receiver<Outcome>) -> Decision {
        loop {
            match outcomes.recv_async().await.unwrap() {
                Outcome::Preview(decision) => return decision,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sharp_still_reaches_preview() {
        let (driver, inputs, outcomes) = driver(vec![checkerboard(320, 240)]);
        let task = tokio::spawn(driver.run());

        inputs.send(Input::Start).unwrap();
        let decision = next_preview(&outcomes).await;
        assert!(decision.score > 150.0);
        assert_eq!(decision.frame.width(), 320);

        inputs.send(Input::Shutdown).unwrap();
        let controller = task.await.unwrap();
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn blurry_stream_only_reports_sharpness() {
        let (driver, inputs, outcomes) = driver(vec![flat(320, 240)]);
        let task = tokio::spawn(driver.run());

        inputs.send(Input::Start).unwrap();
        let mut readings = 0;
        while readings < 3 {
            match outcomes.recv_async().await.unwrap() {
                Outcome::Sharpness { score, stable } => {
                    assert_eq!(score, 0.0);
                    assert!(stable);
                    readings += 1;
                }
                Outcome::PhaseChanged(phase) => assert_eq!(phase, Phase::Monitoring),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        drop(inputs);
        let controller = task.await.unwrap();
        assert_eq!(controller.phase(), Phase::Idle);
        let last = outcomes.drain().last();
        assert!(matches!(last, Some(Outcome::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn accept_without_dispatcher_reports_encoded_image() {
        let (driver, inputs, outcomes) = driver(vec![checkerboard(320, 240)]);
        let task = tokio::spawn(driver.run());

        inputs.send(Input::Start).unwrap();
        next_preview(&outcomes).await;
        inputs.send(Input::Accept).unwrap();

        let image = loop {
            match outcomes.recv_async().await.unwrap() {
                Outcome::Accepted { image, .. } => break image,
                _ => continue,
            }
        };
        assert_eq!(image.mime, "image/jpeg");
        assert_eq!((image.width, image.height), (320, 240));

        inputs.send(Input::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn single_shot_burst_reports_every_phase() {
        let mut config = Config::default();
        config.capture.burst_count = 1;
        let controller = CaptureController::new(
            &config,
            Box::new(StillFrameSource::from_frames(vec![checkerboard(320, 240)])),
            Box::new(FixedMotionSource::stationary()),
        );
        let (input_tx, input_rx) = flume::unbounded();
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let task = tokio::spawn(CaptureDriver::new(controller, input_rx, outcome_tx).run());

        input_tx.send(Input::Start).unwrap();
        let mut phases = Vec::new();
        loop {
            match outcome_rx.recv_async().await.unwrap() {
                Outcome::PhaseChanged(phase) => phases.push(phase),
                Outcome::Preview(_) => break,
                _ => continue,
            }
        }
        // The burst starts and finishes within one tick but is still reported.
        assert_eq!(
            phases,
            [Phase::Monitoring, Phase::BurstCapturing, Phase::AwaitingUserDecision]
        );

        input_tx.send(Input::Shutdown).unwrap();
        task.await.unwrap();
        let rest = outcome_rx.drain().collect::<Vec<_>>();
        assert!(matches!(rest.as_slice(), [Outcome::PhaseChanged(Phase::Idle), Outcome::Stopped]));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_motion_is_reported() {
        let controller = CaptureController::new(
            &Config::default(),
            Box::new(StillFrameSource::from_frames(vec![checkerboard(64, 64)])),
            Box::new(FixedMotionSource::denied()),
        );
        let (input_tx, input_rx) = flume::unbounded();
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let task = tokio::spawn(CaptureDriver::new(controller, input_rx, outcome_tx).run());

        input_tx.send(Input::Start).unwrap();
        assert!(matches!(
            outcome_rx.recv_async().await.unwrap(),
            Outcome::Rejected(CaptureError::PermissionDenied)
        ));

        input_tx.send(Input::Shutdown).unwrap();
        assert_eq!(task.await.unwrap().phase(), Phase::Idle);
    }
}
