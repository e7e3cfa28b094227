use std::time::{Duration, Instant};

use crate::capture::Frame;

/// A scored frame. Produced once per analysis tick or burst shot.
#[derive(Debug, Clone)]
pub struct SharpnessSample {
    pub score: f64,
    pub frame: Frame,
    pub timestamp: Instant,
}

impl SharpnessSample {
    /// Non-finite or negative scores are clamped to 0 so selection stays total.
    pub fn new(score: f64, frame: Frame) -> Self {
        let score = if score.is_finite() { score.max(0.0) } else { 0.0 };
        Self {
            score,
            timestamp: frame.timestamp,
            frame,
        }
    }
}

/// Shots of one burst, in capture order
#[derive(Debug)]
pub struct BurstResult {
    shots: Vec<SharpnessSample>,
    expected: u32,
    attempts: u32,
    started_at: Instant,
}

impl BurstResult {
    pub fn new(expected: u32) -> Self {
        Self {
            shots: Vec::with_capacity(expected as usize),
            expected,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record(&mut self, sample: SharpnessSample) {
        self.attempts += 1;
        self.shots.push(sample);
    }

    /// A shot that produced no frame still uses up its slot.
    pub fn skip(&mut self) {
        self.attempts += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.attempts >= self.expected
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn shots(&self) -> &[SharpnessSample] {
        &self.shots
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Highest score wins; the earliest shot wins a tie.
    pub fn into_best(self) -> Option<SharpnessSample> {
        select_best(self.shots)
    }
}

pub fn select_best(shots: impl IntoIterator<Item = SharpnessSample>) -> Option<SharpnessSample> {
    shots.into_iter().fold(None, |best, shot| match best {
        Some(best) if best.score >= shot.score => Some(best),
        _ => Some(shot),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    fn shot(seq: u64, score: f64) -> SharpnessSample {
        let frame = Frame::new(seq, 1, 1, PixelFormat::Gray8, vec![0]).unwrap();
        SharpnessSample::new(score, frame)
    }

    #[test]
    fn picks_highest_score() {
        let mut burst = BurstResult::new(3);
        for (seq, score) in [(0, 12.0), (1, 45.0), (2, 30.0)] {
            burst.record(shot(seq, score));
        }
        assert!(burst.is_complete());
        let best = burst.into_best().unwrap();
        assert_eq!(best.frame.sequence(), 1);
        assert_eq!(best.score, 45.0);
    }

    #[test]
    fn earliest_shot_wins_a_tie() {
        let best = select_best(vec![shot(0, 10.0), shot(1, 50.0), shot(2, 50.0), shot(3, 20.0)]).unwrap();
        assert_eq!(best.frame.sequence(), 1);
    }

    #[test]
    fn skipped_shots_count_towards_completion() {
        let mut burst = BurstResult::new(3);
        burst.skip();
        burst.record(shot(1, 5.0));
        assert!(!burst.is_complete());
        burst.skip();
        assert!(burst.is_complete());
        assert_eq!(burst.shots().len(), 1);
    }

    #[test]
    fn empty_burst_has_no_winner() {
        let mut burst = BurstResult::new(2);
        burst.skip();
        burst.skip();
        assert!(burst.into_best().is_none());
    }

    #[test]
    fn nan_scores_never_win() {
        let best = select_best(vec![shot(0, f64::NAN), shot(1, 3.0)]).unwrap();
        assert_eq!(best.frame.sequence(), 1);
        assert_eq!(shot(2, f64::INFINITY).score, 0.0);
    }
}
