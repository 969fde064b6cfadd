//! Octave-error correction by harmonic scoring.
//!
//! A period estimator occasionally locks onto a harmonic or a sub-harmonic of
//! the real note. Given a candidate `f`, the corrector scores `f`, `f/2` and
//! `2f` against the frame's spectrum. The score weights energy at the candidate
//! itself most heavily, with smaller credit for its 2nd and 3rd harmonics, so a
//! real fundamental beats a harmonic mistaken for one.
//!
//! Plucked low strings often carry more energy at the 2nd harmonic than at the
//! fundamental, so an octave neighbour only replaces `f` when it outscores it by
//! the configured margin. The pipeline calls the corrector only for frames whose
//! YIN confidence marks them as ambiguous.

use tracing::trace;

use crate::config::AnalyzerConfig;
use crate::fft::Spectrum;

const FUNDAMENTAL_WEIGHT: f32 = 1.00;
const SECOND_HARMONIC_WEIGHT: f32 = 0.35;
const THIRD_HARMONIC_WEIGHT: f32 = 0.15;

#[derive(Debug, Clone)]
pub struct OctaveCorrector {
    min_frequency: f32,
    max_frequency: f32,
    harmonic_bandwidth: f32,
    third_harmonic_bandwidth: f32,
    margin: f32,
}

impl OctaveCorrector {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            harmonic_bandwidth: config.harmonic_bandwidth,
            third_harmonic_bandwidth: config.third_harmonic_bandwidth,
            margin: config.octave_margin,
        }
    }

    fn in_range(&self, frequency: f32) -> bool {
        (self.min_frequency..=self.max_frequency).contains(&frequency)
    }

    /// Harmonic score of `frequency` as a fundamental.
    ///
    /// Harmonics above the valid range contribute nothing.
    pub fn score(&self, spectrum: &Spectrum, frequency: f32) -> f32 {
        let fundamental = spectrum.peak_near(frequency, self.harmonic_bandwidth);
        let second = if frequency * 2.0 <= self.max_frequency {
            spectrum.peak_near(frequency * 2.0, self.harmonic_bandwidth)
        } else {
            0.0
        };
        let third = if frequency * 3.0 <= self.max_frequency {
            spectrum.peak_near(frequency * 3.0, self.third_harmonic_bandwidth)
        } else {
            0.0
        };
        FUNDAMENTAL_WEIGHT * fundamental
            + SECOND_HARMONIC_WEIGHT * second
            + THIRD_HARMONIC_WEIGHT * third
    }

    /// Picks the best of `{f, f/2, 2f}` within the valid range.
    ///
    /// Returns 0 for a non-positive candidate and the candidate unchanged when
    /// none of the three lies in range. An in-range `f` is kept unless `f/2` or
    /// `2f` scores more than `margin` times as high; between the two
    /// neighbours the strictly higher score wins.
    pub fn correct(&self, spectrum: &Spectrum, candidate: f32) -> f32 {
        if candidate <= 0.0 {
            return 0.0;
        }

        let mut best = candidate;
        let mut best_score = if self.in_range(candidate) {
            self.score(spectrum, candidate) * self.margin
        } else {
            -1.0
        };
        for frequency in [candidate / 2.0, candidate * 2.0] {
            if !self.in_range(frequency) {
                continue;
            }
            let score = self.score(spectrum, frequency);
            if score > best_score {
                best = frequency;
                best_score = score;
            }
        }

        if best != candidate {
            trace!("octave correction: {:.2} Hz -> {:.2} Hz", candidate, best);
        }
        best
    }
}
