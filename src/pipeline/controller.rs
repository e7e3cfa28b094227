//! Capture-readiness state machine
//!
//! Every external stimulus (timer tick, motion sample, burst shot timer, user
//! accept/retry) enters through [`CaptureController::handle`]. The controller
//! never owns a timer; it returns [`Command`]s for the driver to execute.
//!
//! ```text
//! Idle --Start--> Monitoring --(score > threshold && stable)--> BurstCapturing
//! BurstCapturing --(burst complete)--> AwaitingUserDecision
//! AwaitingUserDecision --Accept--> Idle (dispatch)
//! AwaitingUserDecision --Retry--> Monitoring
//! Monitoring --Stop--> Idle
//! ```

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::burst::{BurstResult, SharpnessSample};
use super::motion::{MotionGate, MotionSample, MotionSource, StabilityState};
use super::preview::{Decision, PreviewGate};
use super::session::{CaptureSession, Phase};
use super::sharpness::{LaplacianScorer, RegionOfInterest, SharpnessScorer};
use crate::capture::{Frame, FrameSource};
use crate::error::CaptureError;
use crate::{CaptureConfig, Config};

/// Discrete inputs to the state machine
#[derive(Debug, Clone)]
pub enum Event {
    Start,
    Stop,
    /// Monitoring interval elapsed
    Tick,
    Motion(MotionSample),
    /// Inter-shot delay of a running burst elapsed
    ShotDue,
    Accept,
    Retry,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone)]
pub enum Command {
    StartTicker(Duration),
    StopTicker,
    ScheduleShot(Duration),
    /// Live sharpness reading from a monitoring tick
    Sharpness { score: f64, stable: bool },
    /// Show the burst winner for accept/retry
    Present(Decision),
    /// Hand the accepted frame to the OCR boundary
    Dispatch(Decision),
}

pub struct CaptureController {
    config: CaptureConfig,
    roi: RegionOfInterest,
    session: CaptureSession,
    source: Box<dyn FrameSource>,
    scorer: Box<dyn SharpnessScorer>,
    motion: MotionGate,
    burst: Option<BurstResult>,
    preview: PreviewGate,
}

impl CaptureController {
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource>,
        motion: Box<dyn MotionSource>,
    ) -> Self {
        let session = CaptureSession::new();
        let motion = MotionGate::new(
            motion,
            session.stability().clone(),
            config.motion.stability_threshold,
        );

        Self {
            config: config.capture.clone(),
            roi: config.capture.region_of_interest(),
            session,
            source,
            scorer: Box::new(LaplacianScorer),
            motion,
            burst: None,
            preview: PreviewGate::default(),
        }
    }

    /// Replace the default Laplacian scorer.
    pub fn with_scorer(mut self, scorer: Box<dyn SharpnessScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Phases entered since the last call, including those passed through
    /// within a single event.
    pub fn take_transitions(&mut self) -> Vec<Phase> {
        self.session.take_changes()
    }

    pub fn stability(&self) -> &StabilityState {
        self.session.stability()
    }

    pub fn preview(&self) -> Option<&Decision> {
        self.preview.current()
    }

    pub fn is_capturing(&self) -> bool {
        self.burst.is_some()
    }

    pub fn is_stable(&self) -> bool {
        self.motion.is_stable()
    }

    /// Single entry point for every external event.
    ///
    /// An `Err` leaves the controller in the phase it was in before the event.
    #[instrument(level = "debug", skip(self), fields(phase = %self.session.phase()))]
    pub fn handle(&mut self, event: Event) -> Result<Vec<Command>, CaptureError> {
        match (self.session.phase(), event) {
            (_, Event::Motion(sample)) => {
                self.motion.observe(sample);
                Ok(Vec::new())
            }
            (Phase::Idle, Event::Start) => self.start_monitoring(),
            (Phase::Monitoring, Event::Stop) => Ok(self.stop_monitoring()),
            (Phase::Monitoring, Event::Tick) => Ok(self.on_tick()),
            (Phase::BurstCapturing, Event::ShotDue) => Ok(self.on_shot_due()),
            (Phase::AwaitingUserDecision, Event::Accept) => Ok(self.on_accept()),
            (Phase::AwaitingUserDecision, Event::Retry) => self.on_retry(),
            (Phase::AwaitingUserDecision, Event::Stop) => {
                self.preview.retry();
                self.session.transition(Phase::Idle);
                Ok(Vec::new())
            }
            (phase, event) => {
                debug!(%phase, ?event, "Event ignored in this phase");
                Ok(Vec::new())
            }
        }
    }

    /// Tear down regardless of phase; an in-flight burst is abandoned.
    pub fn shutdown(&mut self) {
        self.motion.stop();
        self.burst = None;
        self.preview.retry();
        self.session.transition(Phase::Idle);
    }

    fn start_monitoring(&mut self) -> Result<Vec<Command>, CaptureError> {
        self.motion.start()?;
        self.session.transition(Phase::Monitoring);
        Ok(vec![Command::StartTicker(self.config.tick_interval())])
    }

    fn stop_monitoring(&mut self) -> Vec<Command> {
        self.motion.stop();
        self.session.transition(Phase::Idle);
        vec![Command::StopTicker]
    }

    fn on_tick(&mut self) -> Vec<Command> {
        let frame = match self.source.grab(self.config.analysis_width) {
            Ok(frame) => frame,
            Err(CaptureError::NotReady) => {
                debug!("Frame source not ready, skipping tick");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Frame source failed, skipping tick");
                return Vec::new();
            }
        };

        let score = self.score_or_zero(&frame);
        let stable = self.motion.is_stable();
        metrics::histogram!("docsnap_analysis_sharpness").record(score);
        debug!(score, stable, seq = frame.sequence(), "Analysis tick");

        let mut commands = vec![Command::Sharpness { score, stable }];
        if score > self.config.sharpness_threshold && stable {
            self.begin_burst(&mut commands);
        }
        commands
    }

    fn begin_burst(&mut self, commands: &mut Vec<Command>) {
        debug_assert!(self.burst.is_none(), "burst already in flight");

        info!(
            count = self.config.burst_count,
            delay_ms = self.config.burst_delay_ms,
            "Sharp and stable, starting burst"
        );
        metrics::counter!("docsnap_bursts_total").increment(1);

        commands.push(Command::StopTicker);
        self.session.transition(Phase::BurstCapturing);
        self.burst = Some(BurstResult::new(self.config.burst_count));
        self.take_shot(commands);
    }

    fn on_shot_due(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.burst.is_some() {
            self.take_shot(&mut commands);
        }
        commands
    }

    fn take_shot(&mut self, commands: &mut Vec<Command>) {
        let shot = match self.source.grab(self.config.capture_width) {
            Ok(frame) => {
                let score = self.score_or_zero(&frame);
                Some(SharpnessSample::new(score, frame))
            }
            Err(e) => {
                warn!(error = %e, "Burst shot failed, skipping");
                None
            }
        };

        let Some(burst) = self.burst.as_mut() else {
            return;
        };
        match shot {
            Some(sample) => {
                debug!(shot = burst.attempts(), score = sample.score, "Burst shot");
                burst.record(sample);
            }
            None => burst.skip(),
        }

        if burst.is_complete() {
            self.finish_burst(commands);
        } else {
            commands.push(Command::ScheduleShot(self.config.burst_delay()));
        }
    }

    fn finish_burst(&mut self, commands: &mut Vec<Command>) {
        let Some(burst) = self.burst.take() else {
            return;
        };
        metrics::histogram!("docsnap_burst_duration_ms").record(burst.elapsed().as_secs_f64() * 1000.0);

        match burst.into_best() {
            Some(best) => {
                info!(
                    score = best.score,
                    seq = best.frame.sequence(),
                    "Burst complete, best shot selected"
                );
                metrics::histogram!("docsnap_burst_best_sharpness").record(best.score);

                let decision = Decision {
                    frame: best.frame,
                    score: best.score,
                };
                self.motion.stop();
                self.preview.present(decision.clone());
                self.session.transition(Phase::AwaitingUserDecision);
                commands.push(Command::Present(decision));
            }
            None => {
                warn!("Burst produced no frames, resuming monitoring");
                self.session.transition(Phase::Monitoring);
                commands.push(Command::StartTicker(self.config.tick_interval()));
            }
        }
    }

    fn on_accept(&mut self) -> Vec<Command> {
        let Some(decision) = self.preview.accept() else {
            warn!("Accept with no decision frame");
            self.session.transition(Phase::Idle);
            return Vec::new();
        };

        info!(score = decision.score, seq = decision.frame.sequence(), "Capture accepted");
        metrics::counter!("docsnap_accepted_total").increment(1);
        self.session.transition(Phase::Idle);
        vec![Command::Dispatch(decision)]
    }

    fn on_retry(&mut self) -> Result<Vec<Command>, CaptureError> {
        // Keep the decision frame if monitoring cannot resume.
        self.motion.start()?;

        info!("Capture rejected, resuming monitoring");
        metrics::counter!("docsnap_retried_total").increment(1);
        self.preview.retry();
        self.session.transition(Phase::Monitoring);
        Ok(vec![Command::StartTicker(self.config.tick_interval())])
    }

    fn score_or_zero(&self, frame: &Frame) -> f64 {
        match self.scorer.score(frame, Some(&self.roi)) {
            Ok(score) if score.is_finite() => score,
            Ok(score) => {
                warn!(score, "Non-finite sharpness score, using 0");
                0.0
            }
            Err(e) => {
                warn!(error = %e, seq = frame.sequence(), "Sharpness scoring failed, using 0");
                metrics::counter!("docsnap_scoring_failures_total").increment(1);
                0.0
            }
        }
    }
}
