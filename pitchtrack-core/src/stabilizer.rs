//! # Stabilizer Module
//!
//! Turns a jittery per-frame frequency into a value steady enough to display.
//!
//! Two layers run on every detected frame:
//! 1. **Median outlier rejection**: a value far from the median of recent
//!    frames, or far from the last accepted value, is replaced by the median.
//! 2. **Hysteresis confirmation**: after a confidence gate, a value either
//!    reinforces the running candidate (exponentially smoothed) or restarts it.
//!    The candidate is only published after enough consecutive reinforcements.

use std::collections::VecDeque;

use tracing::trace;

use crate::config::AnalyzerConfig;

/// Result of feeding one frame through the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confirmation {
    /// The candidate is confirmed; publish this frequency.
    Published(f32),
    /// The candidate has not been reinforced often enough yet.
    Pending,
    /// The frame failed the confidence gate.
    LowConfidence,
    /// Nothing usable was passed in.
    Silent,
}

/// Mutable stabilization state, exposed for inspection and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StabilizationState {
    /// Most recent frame frequencies, oldest first.
    pub frequency_history: VecDeque<f32>,
    /// Last value that came out of outlier rejection.
    pub last_good_frequency: f32,
    /// Running candidate frequency, 0 when none.
    pub candidate_frequency: f32,
    /// Consecutive observations that reinforced the candidate.
    pub candidate_hit_count: u32,
}

#[derive(Debug, Clone)]
pub struct Stabilizer {
    history_len: usize,
    median_deviation: f32,
    jump_deviation: f32,
    split_frequency: f32,
    confidence_low: f32,
    confidence_high: f32,
    tolerance_low: f32,
    tolerance_high: f32,
    smoothing: f32,
    confirm_hits: u32,
    state: StabilizationState,
    sorted: Vec<f32>,
}

impl Stabilizer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            history_len: config.history_len,
            median_deviation: config.median_deviation,
            jump_deviation: config.jump_deviation,
            split_frequency: config.split_frequency,
            confidence_low: config.confidence_low,
            confidence_high: config.confidence_high,
            tolerance_low: config.tolerance_low,
            tolerance_high: config.tolerance_high,
            smoothing: config.smoothing,
            confirm_hits: config.confirm_hits,
            state: StabilizationState {
                frequency_history: VecDeque::with_capacity(config.history_len + 1),
                ..StabilizationState::default()
            },
            sorted: Vec::with_capacity(config.history_len + 1),
        }
    }

    pub fn state(&self) -> &StabilizationState {
        &self.state
    }

    pub fn hit_count(&self) -> u32 {
        self.state.candidate_hit_count
    }

    /// Full stabilization of one detected frame.
    pub fn observe(&mut self, frequency: f32, confidence: f32) -> Confirmation {
        let stable = self.reject_outliers(frequency);
        if stable <= 0.0 {
            self.silence();
            return Confirmation::Silent;
        }
        self.confirm(stable, confidence)
    }

    /// History-median outlier rejection.
    ///
    /// Non-positive input returns 0 and leaves the history untouched, so a
    /// short dropout does not wipe it.
    pub fn reject_outliers(&mut self, frequency: f32) -> f32 {
        if frequency <= 0.0 {
            return 0.0;
        }

        let history = &mut self.state.frequency_history;
        history.push_back(frequency);
        while history.len() > self.history_len {
            history.pop_front();
        }
        self.sorted.clear();
        self.sorted.extend(history.iter().copied());
        let median = median(&mut self.sorted);

        let mut f = frequency;
        if median > 0.0 && (f - median).abs() / median > self.median_deviation {
            trace!("outlier {:.2} Hz replaced by median {:.2} Hz", f, median);
            f = median;
        }

        let last_good = self.state.last_good_frequency;
        if last_good > 0.0 && (f - last_good).abs() / last_good > self.jump_deviation {
            trace!("jump from {:.2} Hz to {:.2} Hz clamped to median", last_good, f);
            f = median;
        }

        self.state.last_good_frequency = f;
        f
    }

    /// Confidence gate followed by hysteresis confirmation.
    pub fn confirm(&mut self, stable: f32, confidence: f32) -> Confirmation {
        let high = stable >= self.split_frequency;
        let min_confidence = if high {
            self.confidence_high
        } else {
            self.confidence_low
        };
        if confidence < min_confidence {
            self.state.candidate_hit_count = 0;
            return Confirmation::LowConfidence;
        }

        let state = &mut self.state;
        let base = state.candidate_frequency;
        if base <= 0.0 {
            state.candidate_frequency = stable;
            state.candidate_hit_count = 1;
        } else {
            let tolerance = if high {
                self.tolerance_high
            } else {
                self.tolerance_low
            };
            if (stable - base).abs() / base < tolerance {
                state.candidate_hit_count += 1;
                state.candidate_frequency = base * self.smoothing + stable * (1.0 - self.smoothing);
            } else {
                state.candidate_frequency = stable;
                state.candidate_hit_count = 1;
            }
        }

        if state.candidate_hit_count >= self.confirm_hits {
            Confirmation::Published(state.candidate_frequency)
        } else {
            Confirmation::Pending
        }
    }

    /// Records a silent or undetected frame: confirmation restarts from zero.
    pub fn silence(&mut self) {
        self.state.candidate_hit_count = 0;
    }

    /// Forgets everything, as after switching devices.
    pub fn reset(&mut self) {
        self.state.frequency_history.clear();
        self.state.last_good_frequency = 0.0;
        self.state.candidate_frequency = 0.0;
        self.state.candidate_hit_count = 0;
    }
}

/// Median of the values, averaging the middle pair for even counts; 0 when empty.
///
/// Sorts `sorted` in place.
fn median(sorted: &mut [f32]) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
