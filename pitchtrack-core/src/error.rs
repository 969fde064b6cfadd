//! Error types surfaced to callers of the core crate.
//!
//! Nothing inside the per-block analysis path produces these: silence, low
//! confidence and internal failures there are expressed as
//! [`FrameOutcome`](crate::pipeline::FrameOutcome) values instead. Errors only
//! reach callers from configuration loading and from stream lifecycle calls
//! (start, reconfigure, stop).

use thiserror::Error;

/// Errors reported by configuration loading and the stream driver.
#[derive(Debug, Error)]
pub enum TunerError {
    /// The input device could not be found, queried or opened.
    #[error("audio device failure: {0}")]
    Device(String),

    /// The device was found but an input stream could not be built or started.
    #[error("failed to start input stream: {0}")]
    StreamBuild(String),

    /// A configuration value is out of its valid range.
    #[error("invalid configuration `{field}`: {msg}")]
    Config {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        msg: String,
    },

    /// The driver's control thread has exited and can no longer take requests.
    #[error("stream driver is stopped")]
    DriverStopped,

    /// Reading a configuration file failed.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid JSON for [`AnalyzerConfig`](crate::config::AnalyzerConfig).
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl TunerError {
    pub(crate) fn config(field: &'static str, msg: impl Into<String>) -> Self {
        TunerError::Config {
            field,
            msg: msg.into(),
        }
    }
}
