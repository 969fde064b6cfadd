//! # Pitch Detection Module
//!
//! Time-domain period estimation with the YIN algorithm. The estimator turns
//! an analysis window into a [`PitchCandidate`]: a fundamental frequency plus
//! a confidence derived from how deep the chosen period's dip is.
//!
//! ## Features
//! - Peak-amplitude noise gate
//! - Cumulative mean normalized difference with an absolute threshold
//! - Local-minimum walk after the first dip, global-minimum fallback
//! - Parabolic interpolation for sub-sample accuracy

use crate::config::AnalyzerConfig;

/// A fundamental-frequency estimate with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchCandidate {
    /// Estimated fundamental in Hz, 0 when nothing was detected.
    pub frequency: f32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl PitchCandidate {
    /// The "no detection" result.
    pub const NONE: PitchCandidate = PitchCandidate {
        frequency: 0.0,
        confidence: 0.0,
    };

    pub fn is_detected(&self) -> bool {
        self.frequency > 0.0
    }
}

/// YIN period estimator with reusable scratch buffers.
#[derive(Debug, Clone)]
pub struct YinEstimator {
    min_frequency: f32,
    max_frequency: f32,
    noise_gate: f32,
    threshold: f64,
    reject_above: f64,
    min_window: usize,
    centered: Vec<f32>,
    cmndf: Vec<f64>,
}

impl YinEstimator {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            noise_gate: config.noise_gate,
            threshold: config.yin_threshold as f64,
            reject_above: config.yin_reject as f64,
            min_window: config.min_yin_window,
            centered: Vec::new(),
            cmndf: Vec::new(),
        }
    }

    /// Estimates the fundamental of `window`.
    ///
    /// Returns [`PitchCandidate::NONE`] when the window is too short or below
    /// the noise gate, when the search range does not fit the window, when the
    /// best period is not trustworthy, or when the resulting frequency falls
    /// outside the configured range.
    pub fn estimate(&mut self, window: &[f32], sample_rate: u32) -> PitchCandidate {
        let n = window.len();
        if n < self.min_window || sample_rate == 0 {
            return PitchCandidate::NONE;
        }

        // --- Noise Gate: no pitch in silence ---
        let peak = window.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()));
        if peak < self.noise_gate {
            return PitchCandidate::NONE;
        }

        // --- Step 1: DC removal ---
        let mean = window.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        self.centered.clear();
        self.centered
            .extend(window.iter().map(|&s| (s as f64 - mean) as f32));

        let sr = sample_rate as f32;
        let tau_min = ((sr / self.max_frequency) as usize).max(1);
        let tau_max = ((sr / self.min_frequency) as usize).min(n / 2);
        if tau_max <= tau_min + 2 {
            return PitchCandidate::NONE;
        }

        // --- Steps 2 & 3: difference function, cumulative mean normalized ---
        self.compute_cmndf(tau_max);
        let cmndf = &self.cmndf;

        // --- Step 4: first dip under the threshold, walked to its minimum ---
        let first_dip = (tau_min..tau_max).find(|&t| cmndf[t] < self.threshold).map(|mut t| {
            while t < tau_max && cmndf[t + 1] < cmndf[t] {
                t += 1;
            }
            t
        });
        let tau = match first_dip {
            Some(t) => t,
            None => (tau_min..tau_max)
                .min_by(|&a, &b| {
                    cmndf[a]
                        .partial_cmp(&cmndf[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(tau_min),
        };

        // --- Step 5: confidence from the depth of the minimum ---
        let best = cmndf[tau];
        if best > self.reject_above {
            return PitchCandidate::NONE;
        }
        let confidence = (1.0 - best).clamp(0.0, 1.0) as f32;

        // --- Step 6: parabolic interpolation for better precision ---
        let mut better_tau = tau as f64;
        if tau >= 1 && tau < tau_max {
            let y0 = cmndf[tau - 1];
            let y1 = cmndf[tau];
            let y2 = cmndf[tau + 1];
            let denominator = y0 - 2.0 * y1 + y2;
            if denominator.abs() > 1e-12 {
                better_tau += 0.5 * (y0 - y2) / denominator;
            }
        }
        if better_tau <= 0.0 {
            return PitchCandidate::NONE;
        }

        // --- Step 7: range check ---
        let frequency = (sample_rate as f64 / better_tau) as f32;
        if !frequency.is_finite()
            || frequency < self.min_frequency
            || frequency > self.max_frequency
        {
            return PitchCandidate::NONE;
        }

        PitchCandidate {
            frequency,
            confidence,
        }
    }

    /// Fills `self.cmndf[0..=tau_max]` from `self.centered`.
    fn compute_cmndf(&mut self, tau_max: usize) {
        let x = &self.centered;
        let n = x.len();
        self.cmndf.clear();
        self.cmndf.resize(tau_max + 1, 0.0);
        self.cmndf[0] = 1.0;

        let mut running_sum = 0.0_f64;
        for tau in 1..=tau_max {
            let diff: f64 = x[..n - tau]
                .iter()
                .zip(&x[tau..])
                .map(|(&a, &b)| {
                    let delta = (a - b) as f64;
                    delta * delta
                })
                .sum();
            running_sum += diff;
            self.cmndf[tau] = if running_sum > 0.0 {
                diff * tau as f64 / running_sum
            } else {
                1.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn estimator() -> YinEstimator {
        YinEstimator::new(&AnalyzerConfig::default())
    }

    #[test]
    fn a3_sine_at_48k() {
        let candidate = estimator().estimate(&sine(220.0, 48_000, 8192, 0.5), 48_000);
        assert!(
            (candidate.frequency - 220.0).abs() < 2.0,
            "frequency = {}",
            candidate.frequency
        );
        assert!(candidate.confidence > 0.7, "confidence = {}", candidate.confidence);
    }

    #[test]
    fn guitar_range_sines_within_one_percent() {
        let mut yin = estimator();
        for freq in [82.41, 110.0, 146.83, 196.0, 246.94, 329.63, 659.25, 1046.5] {
            let candidate = yin.estimate(&sine(freq, 44_100, 8192, 0.4), 44_100);
            assert!(
                (candidate.frequency - freq).abs() / freq < 0.01,
                "{freq} Hz estimated as {}",
                candidate.frequency
            );
        }
    }

    #[test]
    fn silence_is_gated() {
        let quiet = sine(220.0, 48_000, 8192, 0.01);
        assert_eq!(estimator().estimate(&quiet, 48_000), PitchCandidate::NONE);
        assert_eq!(
            estimator().estimate(&vec![0.0; 8192], 48_000),
            PitchCandidate::NONE
        );
    }

    #[test]
    fn below_range_fundamental_is_rejected() {
        let low = sine(49.0, 48_000, 8192, 0.5);
        let candidate = estimator().estimate(&low, 48_000);
        assert!(!candidate.is_detected(), "got {candidate:?}");
        assert_eq!(candidate.confidence, 0.0);
    }

    #[test]
    fn short_window_is_rejected() {
        let short = sine(440.0, 48_000, 256, 0.5);
        assert_eq!(estimator().estimate(&short, 48_000), PitchCandidate::NONE);
    }

    #[test]
    fn window_too_short_for_search_range() {
        // tau_max = 512 / 2 = 256 but tau_min = 1_000_000 / 1200 = 833.
        let window = sine(5000.0, 1_000_000, 512, 0.5);
        assert_eq!(
            estimator().estimate(&window, 1_000_000),
            PitchCandidate::NONE
        );
    }
}
