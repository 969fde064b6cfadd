//! # Musical Tuning Module
//!
//! Maps a published frequency to a musical note and a tuning offset.
//!
//! ## Features
//! - Guitar-range note table (E2 to E5), equal temperament with A4 = 440 Hz
//! - Nearest-note lookup with octave folding, so notes outside the table
//!   still resolve to their pitch class
//! - Cent deviation against the octave-fitted reference
//! - Tuning zones for cent meters and pitch-class matching for the note game

use once_cell::sync::Lazy;
use serde::Serialize;

/// Largest distance in Hz between a frequency and a folded reference for the
/// note to be accepted.
const MATCH_TOLERANCE_HZ: f32 = 10.0;

/// Deviations within this many Hz are treated as equal when picking a note,
/// so the least-folded entry wins between octave-equivalent matches.
const TIE_EPSILON_HZ: f32 = 1e-3;

/// Cents at which detection confidence reaches zero.
const CONFIDENCE_SPAN_CENTS: f32 = 50.0;

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Note name (e.g., "A3", "C#4")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Statically computed notes of the guitar range, E2 (MIDI 40) to E5 (MIDI 76).
///
/// The formula for frequency in equal temperament is f = 440 * 2^((m - 69) / 12)
/// where m is the MIDI note number and 69 is A4.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    const NOTE_NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    (40..=76)
        .map(|midi: i32| {
            let frequency = 440.0 * 2.0_f32.powf((midi - 69) as f32 / 12.0);
            // The octave number changes at C.
            let name = format!("{}{}", NOTE_NAMES[(midi % 12) as usize], midi / 12 - 1);
            Note { name, frequency }
        })
        .collect()
});

/// The note table, lowest note first.
pub fn note_table() -> &'static [Note] {
    &NOTES
}

/// Looks up a note by its name (e.g. "E2").
pub fn find_note_by_name(name: &str) -> Option<&'static Note> {
    NOTES.iter().find(|note| note.name == name)
}

/// Result of mapping a frequency to a note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Name of the matched note from the table.
    pub note: String,
    /// Deviation from the octave-fitted reference, positive when sharp.
    pub cents: f32,
    /// `1 - |cents| / 50`, clamped to `[0, 1]`.
    pub confidence: f32,
    /// Reference frequency folded to the measured octave, in Hz.
    pub target_frequency: f32,
}

/// Folds `reference` by octaves to the representation nearest `measured`.
///
/// Returns the folded frequency and how many octave steps it took.
fn fold_to_nearest(reference: f32, measured: f32) -> (f32, u32) {
    let mut f = reference;
    let mut shifts = 0;
    while f * 2.0 <= measured {
        f *= 2.0;
        shifts += 1;
    }
    while f / 2.0 >= measured {
        f /= 2.0;
        shifts += 1;
    }

    // f is now within an octave, but a neighbour octave may still be closer.
    let mut best = (f, shifts);
    for (candidate, candidate_shifts) in [(f * 2.0, shifts + 1), (f / 2.0, shifts + 1)] {
        if (measured - candidate).abs() < (measured - best.0).abs() {
            best = (candidate, candidate_shifts);
        }
    }
    best
}

/// Finds the table note nearest to `freq`, folding every entry by octaves.
///
/// # Returns
/// * `Some(note_name)` - Closest note, within 10 Hz after folding
/// * `None` - Non-positive frequency, or nothing close enough
pub fn detect_note_name(freq: f32) -> Option<&'static str> {
    if !(freq > 0.0) || !freq.is_finite() {
        return None;
    }

    let mut best: Option<(&'static Note, f32, u32)> = None;
    for note in NOTES.iter() {
        let (folded, shifts) = fold_to_nearest(note.frequency, freq);
        let diff = (freq - folded).abs();
        if diff >= MATCH_TOLERANCE_HZ {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, best_diff, best_shifts)) => {
                diff < best_diff - TIE_EPSILON_HZ
                    || ((diff - best_diff).abs() <= TIE_EPSILON_HZ && shifts < best_shifts)
            }
        };
        if better {
            best = Some((note, diff, shifts));
        }
    }
    best.map(|(note, _, _)| note.name.as_str())
}

/// Returns the named note's frequency folded to the octave nearest `measured`.
pub fn target_frequency_for(note: &str, measured: f32) -> Option<f32> {
    if !(measured > 0.0) {
        return None;
    }
    let reference = find_note_by_name(note)?.frequency;
    Some(fold_to_nearest(reference, measured).0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Cents between `measured` and the named note in its nearest octave.
pub fn cents_from_note(note: &str, measured: f32) -> Option<f32> {
    let target = target_frequency_for(note, measured)?;
    Some(calculate_cents_deviation(measured, target))
}

/// Confidence of a reading `cents` away from its target.
pub fn cents_confidence(cents: f32) -> f32 {
    (1.0 - cents.abs() / CONFIDENCE_SPAN_CENTS).clamp(0.0, 1.0)
}

/// Full detection for the tuner display and the note game.
pub fn detect_note(freq: f32) -> Option<DetectionResult> {
    let note = detect_note_name(freq)?;
    let target_frequency = target_frequency_for(note, freq)?;
    let cents = calculate_cents_deviation(freq, target_frequency);
    Some(DetectionResult {
        note: note.to_string(),
        cents,
        confidence: cents_confidence(cents),
        target_frequency,
    })
}

/// How close a reading is to its target, for colouring a cent meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TuningZone {
    /// Within 12 cents.
    InTune,
    /// Within 30 cents.
    Close,
    /// More than 30 cents low.
    Flat,
    /// More than 30 cents high.
    Sharp,
}

impl TuningZone {
    pub fn classify(cents: f32) -> Self {
        let deviation = cents.abs();
        if deviation <= 12.0 {
            TuningZone::InTune
        } else if deviation <= 30.0 {
            TuningZone::Close
        } else if cents < 0.0 {
            TuningZone::Flat
        } else {
            TuningZone::Sharp
        }
    }
}

/// Bar length for a cent meter: |cents| truncated and capped at 50.
pub fn meter_value(cents: f32) -> u8 {
    cents.abs().min(CONFIDENCE_SPAN_CENTS) as u8
}

/// Strips the octave from a note name: "C#3" becomes "C#".
pub fn pitch_class(note: &str) -> &str {
    note.trim_end_matches(|c: char| c.is_ascii_digit() || c == '-')
}

/// Compares two notes ignoring their octave.
pub fn same_pitch_class(a: &str, b: &str) -> bool {
    let a = pitch_class(a);
    !a.is_empty() && a == pitch_class(b)
}
