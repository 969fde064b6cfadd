// pitchtrack-core/src/lib.rs

//! The core logic for the pitchtrack guitar tuner.
//! This crate turns a live audio input into a stable, confidence-scored
//! fundamental frequency and maps it to a note name and cent offset. It is
//! completely headless and contains no GUI code.
//!
//! Data flows leaf to root:
//! [`ring_buffer`] → [`pitch`] (YIN) → [`fft`] (spectral refinement) →
//! [`octave`] → [`stabilizer`], orchestrated per block by [`pipeline`] and
//! driven from the audio callback by [`audio`]. Consumers read the published
//! frequency and map it with [`tuning`].

pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod octave;
pub mod pipeline;
pub mod pitch;
pub mod ring_buffer;
pub mod stabilizer;
pub mod tuning;

pub use audio::{
    ActiveStream, AudioBackend, BlockHandler, CpalBackend, DeviceCapabilities, PublishedFrequency,
    ResolvedStream, StreamDriver,
};
pub use config::{AnalyzerConfig, StreamSettings};
pub use error::TunerError;
pub use pipeline::{FrameOutcome, Pipeline};
pub use pitch::PitchCandidate;
pub use tuning::{DetectionResult, TuningZone, detect_note};
