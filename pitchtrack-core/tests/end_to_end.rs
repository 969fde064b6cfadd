use pitchtrack_core::config::AnalyzerConfig;
use pitchtrack_core::fft::SpectrumAnalyzer;
use pitchtrack_core::pipeline::{FrameOutcome, Pipeline};
use pitchtrack_core::pitch::YinEstimator;
use pitchtrack_core::tuning;

const BLOCK: usize = 4096;

fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
        })
        .collect()
}

/// Feeds `signal` block by block and returns the value a consumer would see
/// after the last block.
fn published_after(pipeline: &mut Pipeline, signal: &[f32]) -> f32 {
    let mut published = 0.0;
    for block in signal.chunks(BLOCK) {
        if let Some(frequency) = pipeline.process(block).published_frequency() {
            published = frequency;
        }
    }
    published
}

#[test]
fn a3_window_through_every_stage() {
    let window = sine(220.0, 48_000, 8192, 0.5);
    let config = AnalyzerConfig::default();

    let candidate = YinEstimator::new(&config).estimate(&window, 48_000);
    assert!((candidate.frequency - 220.0).abs() < 2.0, "yin = {}", candidate.frequency);
    assert!(candidate.confidence > 0.7);

    let mut analyzer = SpectrumAnalyzer::new();
    let spectrum = analyzer.analyze(&window, 48_000).unwrap();
    let refined = spectrum
        .refine_near(candidate.frequency, config.refine_bandwidth(candidate.frequency))
        .unwrap();
    assert!((refined - 220.0).abs() < 0.5, "refined = {refined}");

    let detection = tuning::detect_note(refined).unwrap();
    assert_eq!(detection.note, "A3");
    assert!(detection.cents.abs() < 4.0);
    assert!(detection.confidence > 0.9);

    let exact = tuning::detect_note(220.0).unwrap();
    assert_eq!(exact.note, "A3");
    assert!(exact.cents.abs() < 1e-3);
    assert!((exact.confidence - 1.0).abs() < 1e-6);
}

#[test]
fn sines_across_range_converge_within_one_percent() {
    let config = AnalyzerConfig::default();
    for &(freq, sample_rate) in &[
        (82.41, 44_100),
        (110.0, 48_000),
        (196.0, 44_100),
        (246.94, 48_000),
        (329.63, 48_000),
        (440.0, 44_100),
        (659.25, 48_000),
        (987.77, 48_000),
    ] {
        let mut pipeline = Pipeline::new(&config, sample_rate);
        let published = published_after(&mut pipeline, &sine(freq, sample_rate, BLOCK * 6, 0.5));
        assert!(
            (published - freq).abs() / freq < 0.01,
            "{freq} Hz at {sample_rate} Hz published as {published}"
        );
    }
}

#[test]
fn convergence_does_not_depend_on_octave_correction() {
    let config = AnalyzerConfig {
        octave_correction: false,
        ..AnalyzerConfig::default()
    };
    let mut pipeline = Pipeline::new(&config, 48_000);
    let published = published_after(&mut pipeline, &sine(146.83, 48_000, BLOCK * 5, 0.3));
    assert!((published - 146.83).abs() / 146.83 < 0.01, "published {published}");
}

#[test]
fn silence_always_publishes_zero() {
    let mut pipeline = Pipeline::new(&AnalyzerConfig::default(), 48_000);
    for amplitude in [0.0, 0.005, 0.019] {
        let signal = sine(220.0, 48_000, BLOCK * 4, amplitude);
        for block in signal.chunks(BLOCK) {
            let outcome = pipeline.process(block);
            assert_eq!(outcome, FrameOutcome::NoSignal);
            assert_eq!(outcome.published_frequency(), Some(0.0));
            assert_eq!(pipeline.stabilizer().hit_count(), 0);
        }
    }
}

#[test]
fn note_then_silence_drops_to_zero() {
    let mut pipeline = Pipeline::new(&AnalyzerConfig::default(), 48_000);
    let played = published_after(&mut pipeline, &sine(110.0, 48_000, BLOCK * 4, 0.5));
    assert!((played - 110.0).abs() < 1.1);

    let after = published_after(&mut pipeline, &vec![0.0; BLOCK]);
    assert_eq!(after, 0.0);
}

#[test]
fn below_range_input_publishes_zero() {
    let mut pipeline = Pipeline::new(&AnalyzerConfig::default(), 48_000);
    let signal = sine(49.0, 48_000, BLOCK * 5, 0.5);
    for block in signal.chunks(BLOCK) {
        let outcome = pipeline.process(block);
        assert_eq!(outcome.published_frequency(), Some(0.0), "got {outcome:?}");
    }
}

#[test]
fn note_change_is_followed() {
    let mut pipeline = Pipeline::new(&AnalyzerConfig::default(), 48_000);
    let first = published_after(&mut pipeline, &sine(196.0, 48_000, BLOCK * 4, 0.5));
    assert!((first - 196.0).abs() / 196.0 < 0.01);

    let second = published_after(&mut pipeline, &sine(246.94, 48_000, BLOCK * 12, 0.5));
    assert!(
        (second - 246.94).abs() / 246.94 < 0.01,
        "still showing {second}"
    );
}

#[test]
fn cents_scenarios() {
    let sharp = tuning::cents_from_note("A3", 225.0).unwrap();
    assert!(sharp > 0.0 && (sharp - 39.0).abs() < 1.0, "sharp = {sharp}");
    let flat = tuning::cents_from_note("A3", 215.0).unwrap();
    assert!(flat < 0.0 && (flat + 40.0).abs() < 1.0, "flat = {flat}");
}
