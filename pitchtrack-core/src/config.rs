//! # Configuration Module
//!
//! Tunables for the analysis pipeline and the input stream. Every value has a
//! default tuned for guitar range at 44.1-48 kHz; a JSON file may override any
//! subset of them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TunerError;

/// Block size requested from the audio device when none is given.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Sample rate assumed when a device does not report a default.
pub const FALLBACK_SAMPLE_RATE: u32 = 48_000;

/// Parameters of the pitch-estimation pipeline.
///
/// Values that differ between low and high notes are split at
/// [`split_frequency`](Self::split_frequency): the `_low` variant applies below
/// it, the `_high` variant at or above it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Ring buffer capacity and analysis window length, in samples.
    pub analysis_window: usize,
    /// Lowest fundamental considered, in Hz.
    pub min_frequency: f32,
    /// Highest fundamental considered, in Hz.
    pub max_frequency: f32,
    /// Peak absolute amplitude below which a block is treated as silence.
    pub noise_gate: f32,
    /// Shortest window the period estimator accepts.
    pub min_yin_window: usize,
    /// cmndf value under which the first dip is taken as the period.
    pub yin_threshold: f32,
    /// cmndf value above which the chosen minimum is rejected.
    pub yin_reject: f32,
    /// Frequency separating "low" and "high" parameter sets, in Hz.
    pub split_frequency: f32,
    /// Half-width of the spectral refinement search below the split, in Hz.
    pub refine_bandwidth_low: f32,
    /// Half-width of the spectral refinement search at or above the split, in Hz.
    pub refine_bandwidth_high: f32,
    /// Remap refined frequencies through harmonic scoring of {f, f/2, 2f}.
    pub octave_correction: bool,
    /// Half-width used when scoring a candidate and its 2nd harmonic, in Hz.
    pub harmonic_bandwidth: f32,
    /// Half-width used when scoring a candidate's 3rd harmonic, in Hz.
    pub third_harmonic_bandwidth: f32,
    /// YIN confidence below which a frame is checked for an octave error.
    pub octave_suspect_confidence: f32,
    /// Factor by which `f/2` or `2f` must outscore `f` to replace it.
    pub octave_margin: f32,
    /// Number of recent frequencies kept for median filtering.
    pub history_len: usize,
    /// Relative deviation from the history median treated as an outlier.
    pub median_deviation: f32,
    /// Relative jump from the last accepted value treated as an outlier.
    pub jump_deviation: f32,
    /// Minimum YIN confidence below the split.
    pub confidence_low: f32,
    /// Minimum YIN confidence at or above the split.
    pub confidence_high: f32,
    /// Relative tolerance for reinforcing the running candidate below the split.
    pub tolerance_low: f32,
    /// Relative tolerance for reinforcing the running candidate at or above the split.
    pub tolerance_high: f32,
    /// Weight of the previous candidate when smoothing in a reinforcing value.
    pub smoothing: f32,
    /// Consecutive consistent observations needed before publishing.
    pub confirm_hits: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analysis_window: 8192,
            min_frequency: 70.0,
            max_frequency: 1200.0,
            noise_gate: 0.02,
            min_yin_window: 512,
            yin_threshold: 0.12,
            yin_reject: 0.30,
            split_frequency: 350.0,
            refine_bandwidth_low: 40.0,
            refine_bandwidth_high: 60.0,
            octave_correction: true,
            harmonic_bandwidth: 10.0,
            third_harmonic_bandwidth: 12.0,
            octave_suspect_confidence: 0.85,
            octave_margin: 1.5,
            history_len: 7,
            median_deviation: 0.15,
            jump_deviation: 0.20,
            confidence_low: 0.45,
            confidence_high: 0.55,
            tolerance_low: 0.04,
            tolerance_high: 0.03,
            smoothing: 0.8,
            confirm_hits: 2,
        }
    }
}

impl AnalyzerConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TunerError> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalyzerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable by the pipeline.
    pub fn validate(&self) -> Result<(), TunerError> {
        if self.min_yin_window < 2 {
            return Err(TunerError::config("min_yin_window", "must be at least 2"));
        }
        if self.analysis_window < self.min_yin_window {
            return Err(TunerError::config(
                "analysis_window",
                format!("must be at least min_yin_window ({})", self.min_yin_window),
            ));
        }
        if !(self.min_frequency > 0.0) || !(self.max_frequency > self.min_frequency) {
            return Err(TunerError::config(
                "min_frequency",
                format!(
                    "need 0 < min_frequency < max_frequency, got {} and {}",
                    self.min_frequency, self.max_frequency
                ),
            ));
        }
        if !(self.noise_gate > 0.0) {
            return Err(TunerError::config("noise_gate", "must be positive"));
        }
        if !(self.yin_threshold > 0.0 && self.yin_threshold <= self.yin_reject) {
            return Err(TunerError::config(
                "yin_threshold",
                "must be positive and not above yin_reject",
            ));
        }
        for (field, value) in [
            ("confidence_low", self.confidence_low),
            ("confidence_high", self.confidence_high),
            ("octave_suspect_confidence", self.octave_suspect_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TunerError::config(field, "must be within [0, 1]"));
            }
        }
        for (field, value) in [
            ("median_deviation", self.median_deviation),
            ("jump_deviation", self.jump_deviation),
            ("tolerance_low", self.tolerance_low),
            ("tolerance_high", self.tolerance_high),
            ("smoothing", self.smoothing),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(TunerError::config(field, "must be within (0, 1)"));
            }
        }
        if !(self.octave_margin >= 1.0) {
            return Err(TunerError::config("octave_margin", "must be at least 1"));
        }
        if self.history_len == 0 {
            return Err(TunerError::config("history_len", "must be at least 1"));
        }
        if self.confirm_hits == 0 {
            return Err(TunerError::config("confirm_hits", "must be at least 1"));
        }
        Ok(())
    }

    /// Spectral refinement half-width for a candidate frequency.
    pub fn refine_bandwidth(&self, frequency: f32) -> f32 {
        if frequency >= self.split_frequency {
            self.refine_bandwidth_high
        } else {
            self.refine_bandwidth_low
        }
    }
}

/// Requested input stream parameters; the payload of a reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Input device name, `None` for the host default.
    pub device: Option<String>,
    /// Channel analysed when the device delivers several.
    pub channel_index: usize,
    /// Sample rate, `None` for the device default.
    pub sample_rate: Option<u32>,
    /// Samples per callback block, `None` for [`DEFAULT_BLOCK_SIZE`].
    pub block_size: Option<u32>,
}
