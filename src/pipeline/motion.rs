//! Accelerometer-based stability gating
//!
//! Each sample is judged on its own: `|x| + |y| + |z| < threshold`. There is no
//! smoothing window, so a single spike flips the state until the next sample.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CaptureError;

/// Device-relative acceleration, gravity excluded
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        self.x.abs() + self.y.abs() + self.z.abs()
    }
}

/// Shared "device is still" flag: one writer (motion stream), one reader (tick)
#[derive(Debug, Clone, Default)]
pub struct StabilityState(Arc<AtomicBool>);

impl StabilityState {
    pub fn is_stable(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, stable: bool) {
        self.0.store(stable, Ordering::Relaxed);
    }
}

/// Write side handed to a [`MotionSource`] on subscribe.
///
/// Cheap to clone and usable from any thread. Once the gate stops, samples
/// delivered through an old listener are dropped.
#[derive(Debug, Clone)]
pub struct MotionListener {
    state: StabilityState,
    threshold: f64,
    live: Arc<AtomicBool>,
}

impl MotionListener {
    /// Record a sample; returns the resulting stability, or `None` if this
    /// listener has been detached.
    pub fn on_sample(&self, sample: MotionSample) -> Option<bool> {
        if !self.live.load(Ordering::Acquire) {
            return None;
        }
        let stable = sample.magnitude() < self.threshold;
        self.state.set(stable);
        Some(stable)
    }
}

/// Stream of acceleration samples (platform sensor, replay, test fake)
pub trait MotionSource: Send {
    /// Start delivering samples to `listener`.
    ///
    /// Returns [`CaptureError::PermissionDenied`] when sensor access is refused.
    fn subscribe(&mut self, listener: MotionListener) -> Result<(), CaptureError>;

    fn unsubscribe(&mut self);
}

/// Instantaneous stability from the most recent sample
pub struct MotionGate {
    source: Box<dyn MotionSource>,
    state: StabilityState,
    threshold: f64,
    live: Option<Arc<AtomicBool>>,
}

impl MotionGate {
    pub fn new(source: Box<dyn MotionSource>, state: StabilityState, threshold: f64) -> Self {
        Self {
            source,
            state,
            threshold,
            live: None,
        }
    }

    /// Subscribe to the motion source. Idempotent while already running.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.live.is_some() {
            return Ok(());
        }

        let live = Arc::new(AtomicBool::new(true));
        let listener = MotionListener {
            state: self.state.clone(),
            threshold: self.threshold,
            live: live.clone(),
        };

        match self.source.subscribe(listener) {
            Ok(()) => {
                info!(threshold = self.threshold, "Motion gate started");
                self.live = Some(live);
                Ok(())
            }
            Err(e) => {
                live.store(false, Ordering::Release);
                warn!(error = %e, "Motion source refused subscription");
                Err(e)
            }
        }
    }

    /// Unsubscribe; the last known stability stays frozen.
    pub fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.store(false, Ordering::Release);
            self.source.unsubscribe();
            debug!(stable = self.state.is_stable(), "Motion gate stopped");
        }
    }

    /// Feed a sample directly (event path). Ignored while stopped.
    pub fn observe(&self, sample: MotionSample) -> Option<bool> {
        if self.live.is_none() {
            return None;
        }
        let stable = sample.magnitude() < self.threshold;
        self.state.set(stable);
        Some(stable)
    }

    pub fn is_stable(&self) -> bool {
        self.state.is_stable()
    }

    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for MotionGate {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Motion source for hosts without a live sensor.
///
/// Delivers its configured sample once on subscribe; further samples are
/// pushed through a [`FixedMotionHandle`].
pub struct FixedMotionSource {
    initial: Option<MotionSample>,
    permitted: bool,
    listener: Arc<Mutex<Option<MotionListener>>>,
}

/// Clonable handle that pushes samples into a [`FixedMotionSource`]
#[derive(Clone)]
pub struct FixedMotionHandle {
    listener: Arc<Mutex<Option<MotionListener>>>,
}

impl FixedMotionSource {
    /// A device held perfectly still.
    pub fn stationary() -> Self {
        Self::with_sample(MotionSample::default())
    }

    pub fn with_sample(sample: MotionSample) -> Self {
        Self {
            initial: Some(sample),
            permitted: true,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// No initial sample: the device reads as unstable until one is pushed.
    pub fn silent() -> Self {
        Self {
            initial: None,
            permitted: true,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Refuses every subscription.
    pub fn denied() -> Self {
        Self {
            initial: None,
            permitted: false,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> FixedMotionHandle {
        FixedMotionHandle {
            listener: self.listener.clone(),
        }
    }
}

impl FixedMotionHandle {
    /// Deliver a sample to the current subscriber, if any.
    pub fn emit(&self, sample: MotionSample) -> Option<bool> {
        let guard = self.listener.lock().ok()?;
        guard.as_ref()?.on_sample(sample)
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl MotionSource for FixedMotionSource {
    fn subscribe(&mut self, listener: MotionListener) -> Result<(), CaptureError> {
        if !self.permitted {
            return Err(CaptureError::PermissionDenied);
        }
        if let Some(sample) = self.initial {
            listener.on_sample(sample);
        }
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(listener);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Ok(mut slot) = self.listener.lock() {
            slot.take();
        }
    }
}
