pub mod burst;
pub mod controller;
pub mod driver;
pub mod motion;
pub mod preview;
pub mod session;
pub mod sharpness;

pub use burst::{select_best, BurstResult, SharpnessSample};
pub use controller::{CaptureController, Command, Event};
pub use driver::{CaptureDriver, Input, Outcome};
pub use motion::{FixedMotionHandle, FixedMotionSource, MotionGate, MotionListener, MotionSample, MotionSource};
pub use preview::{Decision, PreviewGate};
pub use session::{CaptureSession, Phase};
pub use sharpness::{LaplacianScorer, RegionOfInterest, SharpnessScorer};
