//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain side of the pitch pipeline. A [`SpectrumAnalyzer`] turns an
//! analysis window into a magnitude [`Spectrum`], which then serves both the
//! sub-bin refinement of a time-domain estimate and the harmonic scoring used
//! for octave correction.
//!
//! ## Features
//! - Real FFT magnitudes using RustFFT, with cached plans
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Band-limited peak search with parabolic interpolation

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use tracing::trace;

/// Windows shorter than this are too coarse for spectral refinement.
pub const MIN_SPECTRUM_LEN: usize = 2048;

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset puts a large component at 0 Hz that leaks into the low bins
/// where the lowest guitar strings live.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-9 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Magnitude spectrum of one analysis window, bins `0..=n/2`.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    magnitudes: Vec<f32>,
    bin_hz: f32,
}

impl Spectrum {
    /// Builds a spectrum from precomputed magnitudes and the bin spacing in Hz.
    pub fn from_magnitudes(magnitudes: Vec<f32>, bin_hz: f32) -> Self {
        Self { magnitudes, bin_hz }
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Width of one bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    pub fn frequency_of(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_hz
    }

    /// Inclusive bin range whose centre frequencies lie in `[lo, hi]`.
    fn bins_between(&self, lo: f32, hi: f32) -> Option<(usize, usize)> {
        if self.magnitudes.is_empty() || self.bin_hz <= 0.0 || hi < lo {
            return None;
        }
        let start = (lo.max(0.0) / self.bin_hz).ceil() as usize;
        let end = ((hi / self.bin_hz).floor() as usize).min(self.magnitudes.len() - 1);
        (start <= end).then_some((start, end))
    }

    fn argmax_between(&self, lo: f32, hi: f32) -> Option<usize> {
        let (start, end) = self.bins_between(lo, hi)?;
        self.magnitudes[start..=end]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(offset, _)| start + offset)
    }

    /// Largest magnitude within `target ± bandwidth`, or 0 when the band holds
    /// no bins.
    pub fn peak_near(&self, target: f32, bandwidth: f32) -> f32 {
        if target <= 0.0 {
            return 0.0;
        }
        self.argmax_between(target - bandwidth, target + bandwidth)
            .map(|bin| self.magnitudes[bin])
            .unwrap_or(0.0)
    }

    /// Refines a frequency estimate using the strongest bin near it.
    ///
    /// Searches bins within `center ± bandwidth`, then applies parabolic
    /// interpolation across the peak bin and its neighbours for sub-bin
    /// precision.
    ///
    /// # Returns
    /// * `Some(refined_freq)` - Peak frequency near `center`
    /// * `None` - No bin in range, keep the YIN estimate
    pub fn refine_near(&self, center: f32, bandwidth: f32) -> Option<f32> {
        if center <= 0.0 {
            return None;
        }
        let peak_bin = self.argmax_between(center - bandwidth, center + bandwidth)?;
        let mut refined = self.frequency_of(peak_bin);

        if peak_bin >= 1 && peak_bin + 1 < self.magnitudes.len() {
            let a = self.magnitudes[peak_bin - 1] as f64;
            let b = self.magnitudes[peak_bin] as f64;
            let c = self.magnitudes[peak_bin + 1] as f64;
            let denominator = a - 2.0 * b + c;
            if denominator.abs() > 1e-12 {
                let delta = 0.5 * (a - c) / denominator;
                refined = ((peak_bin as f64 + delta) * self.bin_hz as f64) as f32;
            }
        }

        (refined.is_finite() && refined > 0.0).then_some(refined)
    }
}

/// Computes magnitude spectra, caching FFT plans between calls.
///
/// One analyzer lives per pipeline so the audio callback plans the transform
/// once and reuses its buffers afterwards, including the returned spectrum.
pub struct SpectrumAnalyzer {
    fft: Option<Arc<dyn Fft<f32>>>,
    planned_len: usize,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    samples: Vec<f32>,
    spectrum: Spectrum,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("planned_len", &self.planned_len)
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft: None,
            planned_len: 0,
            buffer: Vec::new(),
            scratch: Vec::new(),
            samples: Vec::new(),
            spectrum: Spectrum::default(),
        }
    }

    /// Computes the magnitude spectrum of `signal`.
    ///
    /// This processes the input signal through the following steps:
    /// 1. DC offset removal
    /// 2. Hann windowing
    /// 3. Forward FFT transformation, keeping bins up to Nyquist
    ///
    /// # Returns
    /// * `Some(spectrum)` - Magnitudes of bins `0..=n/2`, valid until the next call
    /// * `None` - Signal shorter than [`MIN_SPECTRUM_LEN`] or zero sample rate
    pub fn analyze(&mut self, signal: &[f32], sample_rate: u32) -> Option<&Spectrum> {
        let n = signal.len();
        if n < MIN_SPECTRUM_LEN || sample_rate == 0 {
            return None;
        }

        let fft = match &self.fft {
            Some(fft) if self.planned_len == n => Arc::clone(fft),
            _ => {
                trace!("planning forward FFT of length {}", n);
                let fft = FftPlanner::new().plan_fft_forward(n);
                self.scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
                self.fft = Some(Arc::clone(&fft));
                self.planned_len = n;
                fft
            }
        };

        self.samples.clear();
        self.samples.extend_from_slice(signal);
        remove_dc_offset(&mut self.samples);
        apply_hann_window(&mut self.samples);

        self.buffer.clear();
        self.buffer
            .extend(self.samples.iter().map(|&sample| Complex { re: sample, im: 0.0 }));
        fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        self.spectrum.magnitudes.clear();
        self.spectrum.magnitudes.extend(
            self.buffer
                .iter()
                .take(n / 2 + 1)
                .map(|c| c.norm()), // .norm() is sqrt(re^2 + im^2)
        );
        self.spectrum.bin_hz = sample_rate as f32 / n as f32;
        Some(&self.spectrum)
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

    #[test]
    fn refines_a3_to_sub_bin_precision() {
        let signal = sine(220.0, 48_000, 8192, 0.5);
        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.analyze(&signal, 48_000).unwrap();
        assert_eq!(spectrum.magnitudes().len(), 4097);

        // Start from a deliberately rough candidate.
        let refined = spectrum.refine_near(218.3, 40.0).unwrap();
        assert!((refined - 220.0).abs() < 0.5, "refined = {refined}");
    }

    #[test]
    fn refine_without_bins_in_band_is_none() {
        let spectrum = Spectrum::from_magnitudes(vec![0.0, 1.0, 0.5], 10.0);
        assert!(spectrum.refine_near(500.0, 5.0).is_none());
        assert!(spectrum.refine_near(0.0, 5.0).is_none());
    }

    #[test]
    fn refine_at_edge_bin_skips_interpolation() {
        let spectrum = Spectrum::from_magnitudes(vec![0.1, 0.2, 0.9], 10.0);
        assert_eq!(spectrum.refine_near(20.0, 5.0), Some(20.0));
    }

    #[test]
    fn peak_near_reads_band_maximum() {
        let spectrum = Spectrum::from_magnitudes(vec![0.0, 3.0, 1.0, 7.0, 2.0], 10.0);
        assert_eq!(spectrum.peak_near(20.0, 10.0), 7.0);
        assert_eq!(spectrum.peak_near(10.0, 4.0), 3.0);
        assert_eq!(spectrum.peak_near(100.0, 4.0), 0.0);
        assert_eq!(spectrum.peak_near(-5.0, 40.0), 0.0);
    }

    #[test]
    fn short_windows_are_not_analysed() {
        let signal = sine(220.0, 48_000, 1024, 0.5);
        assert!(SpectrumAnalyzer::new().analyze(&signal, 48_000).is_none());
    }

    #[test]
    fn plan_is_reused_and_replanned_on_length_change() {
        let mut analyzer = SpectrumAnalyzer::new();
        let a = analyzer.analyze(&sine(440.0, 48_000, 4096, 0.5), 48_000).unwrap();
        assert_eq!(a.magnitudes().len(), 2049);
        let b = analyzer.analyze(&sine(440.0, 48_000, 8192, 0.5), 48_000).unwrap();
        assert_eq!(b.magnitudes().len(), 4097);
        assert!((b.bin_hz() - 48_000.0 / 8192.0).abs() < 1e-6);

        // Same length again: the plan and the spectrum buffer are reused.
        let capacity = analyzer.spectrum.magnitudes.capacity();
        let c = analyzer.analyze(&sine(220.0, 48_000, 8192, 0.5), 48_000).unwrap();
        assert_eq!(c.magnitudes().len(), 4097);
        assert_eq!(analyzer.planned_len, 8192);
        assert_eq!(analyzer.spectrum.magnitudes.capacity(), capacity);
    }

    #[test]
    fn dc_offset_is_removed() {
        let mut signal = vec![1.5, 2.5, 0.5, 1.5];
        remove_dc_offset(&mut signal);
        assert!(signal.iter().sum::<f32>().abs() < 1e-6);
    }
}
