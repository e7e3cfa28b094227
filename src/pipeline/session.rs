use std::fmt;
use std::time::Instant;

use tracing::info;

use super::motion::StabilityState;

/// Lifecycle of one capture UI instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Monitoring,
    BurstCapturing,
    AwaitingUserDecision,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Monitoring => "monitoring",
            Phase::BurstCapturing => "burst-capturing",
            Phase::AwaitingUserDecision => "awaiting-user-decision",
        };
        f.write_str(name)
    }
}

/// Owns the phase and the stability flag shared with the motion stream
#[derive(Debug)]
pub struct CaptureSession {
    phase: Phase,
    stability: StabilityState,
    entered_at: Instant,
    /// Transitions not yet collected by the host
    changes: Vec<Phase>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            stability: StabilityState::default(),
            entered_at: Instant::now(),
            changes: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stability(&self) -> &StabilityState {
        &self.stability
    }

    pub(crate) fn transition(&mut self, to: Phase) {
        if self.phase == to {
            return;
        }
        info!(
            from = %self.phase,
            to = %to,
            after_ms = self.entered_at.elapsed().as_millis() as u64,
            "Capture phase change"
        );
        self.phase = to;
        self.entered_at = Instant::now();
        self.changes.push(to);
    }

    /// Every phase entered since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<Phase> {
        std::mem::take(&mut self.changes)
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_are_collected_in_order_once() {
        let mut session = CaptureSession::new();
        session.transition(Phase::Monitoring);
        session.transition(Phase::Monitoring);
        session.transition(Phase::BurstCapturing);
        session.transition(Phase::AwaitingUserDecision);

        assert_eq!(
            session.take_changes(),
            [Phase::Monitoring, Phase::BurstCapturing, Phase::AwaitingUserDecision]
        );
        assert!(session.take_changes().is_empty());
    }
}
