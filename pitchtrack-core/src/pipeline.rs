//! # Analysis Pipeline Module
//!
//! Runs one mono block through every analysis stage:
//!
//! noise gate → ring buffer → YIN → spectral refinement → octave correction →
//! stabilizer
//!
//! Octave correction only runs on frames whose YIN confidence is below
//! [`AnalyzerConfig::octave_suspect_confidence`].
//!
//! Each call returns a [`FrameOutcome`] instead of an error; the caller decides
//! what to publish from it.

use tracing::{debug, trace};

use crate::config::AnalyzerConfig;
use crate::fft::SpectrumAnalyzer;
use crate::octave::OctaveCorrector;
use crate::pitch::YinEstimator;
use crate::ring_buffer::RingBuffer;
use crate::stabilizer::{Confirmation, Stabilizer};

/// What one block produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// A confirmed frequency, ready to publish.
    Detected { frequency: f32, confidence: f32 },
    /// A plausible reading still waiting for confirmation; keep what is shown.
    Pending,
    /// Silence, not enough history yet, or no usable candidate.
    NoSignal,
    /// A candidate exists but failed the confidence gate.
    LowConfidence,
}

impl FrameOutcome {
    /// The frequency a consumer should see after this frame, or `None` to
    /// leave the current value in place.
    pub fn published_frequency(&self) -> Option<f32> {
        match self {
            FrameOutcome::Detected { frequency, .. } => Some(*frequency),
            FrameOutcome::Pending => None,
            FrameOutcome::NoSignal | FrameOutcome::LowConfidence => Some(0.0),
        }
    }
}

/// Per-stream analysis state. Owned by the audio callback.
#[derive(Debug)]
pub struct Pipeline {
    config: AnalyzerConfig,
    sample_rate: u32,
    ring: RingBuffer,
    window: Vec<f32>,
    yin: YinEstimator,
    spectrum: SpectrumAnalyzer,
    octave: OctaveCorrector,
    stabilizer: Stabilizer,
}

impl Pipeline {
    pub fn new(config: &AnalyzerConfig, sample_rate: u32) -> Self {
        Self {
            config: config.clone(),
            sample_rate,
            ring: RingBuffer::new(config.analysis_window),
            window: Vec::with_capacity(config.analysis_window),
            yin: YinEstimator::new(config),
            spectrum: SpectrumAnalyzer::new(),
            octave: OctaveCorrector::new(config),
            stabilizer: Stabilizer::new(config),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn stabilizer(&self) -> &Stabilizer {
        &self.stabilizer
    }

    /// Processes one mono block.
    pub fn process(&mut self, block: &[f32]) -> FrameOutcome {
        if block.is_empty() {
            return FrameOutcome::Pending;
        }

        // Noise gate on the incoming block.
        let peak = block.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()));
        if peak < self.config.noise_gate {
            self.stabilizer.silence();
            return FrameOutcome::NoSignal;
        }

        self.ring.push(block);
        if !self.ring.window_into(&mut self.window) {
            trace!(
                "buffering: {}/{} samples",
                self.ring.cursor(),
                self.ring.capacity()
            );
            return FrameOutcome::NoSignal;
        }

        // 1) YIN
        let candidate = self.yin.estimate(&self.window, self.sample_rate);
        if !candidate.is_detected() {
            self.stabilizer.silence();
            return FrameOutcome::NoSignal;
        }

        // 2) FFT refinement near the candidate; keep YIN's value if it finds nothing.
        let mut frequency = candidate.frequency;
        let check_octave = self.octave_suspected(candidate.confidence);
        if let Some(spectrum) = self.spectrum.analyze(&self.window, self.sample_rate) {
            let bandwidth = self.config.refine_bandwidth(candidate.frequency);
            if let Some(refined) = spectrum.refine_near(candidate.frequency, bandwidth) {
                frequency = refined;
            }

            // 3) Octave correction against the same spectrum, for ambiguous frames only.
            if check_octave {
                frequency = self.octave.correct(spectrum, frequency);
            }
        }
        trace!(
            "yin {:.2} Hz (confidence {:.2}) -> {:.2} Hz",
            candidate.frequency, candidate.confidence, frequency
        );

        // 4) Stabilization
        match self.stabilizer.observe(frequency, candidate.confidence) {
            Confirmation::Published(frequency) => FrameOutcome::Detected {
                frequency,
                confidence: candidate.confidence,
            },
            Confirmation::Pending => FrameOutcome::Pending,
            Confirmation::LowConfidence => {
                trace!("confidence {:.2} below gate", candidate.confidence);
                FrameOutcome::LowConfidence
            }
            Confirmation::Silent => FrameOutcome::NoSignal,
        }
    }

    fn octave_suspected(&self, confidence: f32) -> bool {
        self.config.octave_correction && confidence < self.config.octave_suspect_confidence
    }

    /// Drops all buffered audio and stabilization history.
    pub fn reset(&mut self) {
        debug!("pipeline reset");
        self.ring.reset();
        self.window.clear();
        self.stabilizer.reset();
    }
}
