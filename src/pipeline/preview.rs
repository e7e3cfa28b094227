use crate::capture::Frame;

/// The burst winner waiting for the user's accept/retry
#[derive(Debug, Clone)]
pub struct Decision {
    pub frame: Frame,
    pub score: f64,
}

/// Holds the current decision frame
#[derive(Debug, Default)]
pub struct PreviewGate {
    current: Option<Decision>,
}

impl PreviewGate {
    pub fn present(&mut self, decision: Decision) {
        self.current = Some(decision);
    }

    pub fn current(&self) -> Option<&Decision> {
        self.current.as_ref()
    }

    /// Hand the frame on; the gate is empty afterwards.
    pub fn accept(&mut self) -> Option<Decision> {
        self.current.take()
    }

    /// Discard the frame.
    pub fn retry(&mut self) {
        self.current = None;
    }
}
