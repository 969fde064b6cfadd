//! # Audio Capture Module
//!
//! Drives the analysis pipeline from a live input stream and publishes the
//! result for other threads to poll.
//!
//! ## Architecture
//! - **Audio callback**: owns a [`BlockHandler`] and runs the whole pipeline on
//!   every block. It never blocks and never propagates a failure: anything that
//!   is not a detection publishes 0.
//! - **Control thread**: owns the stream itself. Reconfiguration and shutdown
//!   requests arrive over a crossbeam channel and are applied there, so the old
//!   stream is always stopped before any state is replaced.
//! - **Consumers**: read the latest frequency through [`PublishedFrequency`].
//!
//! The device layer sits behind [`AudioBackend`]; [`CpalBackend`] is the real
//! implementation.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::{AnalyzerConfig, DEFAULT_BLOCK_SIZE, FALLBACK_SAMPLE_RATE, StreamSettings};
use crate::error::TunerError;
use crate::pipeline::{FrameOutcome, Pipeline};

/// The frequency shown to consumers, shared between the audio callback and
/// any number of readers. 0 means no pitch is currently detected.
#[derive(Debug, Clone, Default)]
pub struct PublishedFrequency(Arc<AtomicU32>);

impl PublishedFrequency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, frequency: f32) {
        self.0.store(frequency.to_bits(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(0.0);
    }
}

/// What a device reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
}

/// Stream parameters after defaults and device limits were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    /// Device name as requested, `None` for the host default.
    pub device: Option<String>,
    /// Channels opened on the device.
    pub channels: u16,
    /// Channel analysed, always below `channels`.
    pub channel_index: usize,
    pub sample_rate: u32,
    pub block_size: u32,
}

impl ResolvedStream {
    /// Applies defaults from `settings` against what the device supports.
    ///
    /// Opens only as many channels as needed to reach `channel_index`.
    pub fn resolve(settings: &StreamSettings, capabilities: &DeviceCapabilities) -> Self {
        let max_channels = capabilities.max_input_channels.max(1);
        let wanted = u16::try_from(settings.channel_index.saturating_add(1)).unwrap_or(u16::MAX);
        let channels = wanted.min(max_channels);
        let sample_rate = settings
            .sample_rate
            .filter(|&rate| rate > 0)
            .unwrap_or(capabilities.default_sample_rate);
        Self {
            device: settings.device.clone(),
            channels,
            channel_index: settings.channel_index.min(channels as usize - 1),
            sample_rate: if sample_rate > 0 {
                sample_rate
            } else {
                FALLBACK_SAMPLE_RATE
            },
            block_size: settings
                .block_size
                .filter(|&size| size > 0)
                .unwrap_or(DEFAULT_BLOCK_SIZE),
        }
    }
}

/// Everything the audio callback needs for one stream.
///
/// Takes interleaved blocks, picks the configured channel, runs the pipeline
/// and publishes the outcome.
#[derive(Debug)]
pub struct BlockHandler {
    pipeline: Pipeline,
    published: PublishedFrequency,
    channels: usize,
    channel_index: usize,
    mono: Vec<f32>,
    #[cfg(test)]
    fail_next: bool,
}

impl BlockHandler {
    pub fn new(
        pipeline: Pipeline,
        published: PublishedFrequency,
        channels: usize,
        channel_index: usize,
    ) -> Self {
        let channels = channels.max(1);
        Self {
            pipeline,
            published,
            channels,
            channel_index: channel_index.min(channels - 1),
            mono: Vec::new(),
            #[cfg(test)]
            fail_next: false,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The value this handler writes to.
    pub fn published(&self) -> &PublishedFrequency {
        &self.published
    }

    /// Processes one interleaved block. Never panics.
    pub fn handle(&mut self, data: &[f32]) -> FrameOutcome {
        self.mono.clear();
        if self.channels == 1 {
            self.mono.extend_from_slice(data);
        } else {
            self.mono.extend(
                data.chunks_exact(self.channels)
                    .map(|frame| frame[self.channel_index]),
            );
        }

        let pipeline = &mut self.pipeline;
        let mono = &self.mono;
        #[cfg(test)]
        let fail = std::mem::take(&mut self.fail_next);
        let outcome = match catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if fail {
                panic!("analysis failure");
            }
            pipeline.process(mono)
        })) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("analysis panicked, dropping pipeline state");
                self.pipeline.reset();
                FrameOutcome::NoSignal
            }
        };

        if let Some(frequency) = outcome.published_frequency() {
            self.published.set(frequency);
        }
        outcome
    }
}

/// A running input stream. Closing it must not return until the callback has
/// stopped running.
pub trait ActiveStream {
    fn close(self: Box<Self>) -> Result<(), TunerError>;
}

/// Supplier of input streams.
pub trait AudioBackend: Send + 'static {
    /// Names of the available input devices.
    fn list_devices(&self) -> Result<Vec<String>, TunerError>;

    /// Queries a device, `None` for the host default.
    fn capabilities(&self, device: Option<&str>) -> Result<DeviceCapabilities, TunerError>;

    /// Opens and starts a stream whose callback feeds `handler`.
    fn open(
        &mut self,
        stream: &ResolvedStream,
        handler: BlockHandler,
    ) -> Result<Box<dyn ActiveStream>, TunerError>;
}

enum Control {
    Reconfigure(StreamSettings, Sender<Result<ResolvedStream, TunerError>>),
    Stop,
}

/// Owns the live stream. Runs on the driver's control thread only.
struct StreamOwner<B: AudioBackend> {
    backend: B,
    config: AnalyzerConfig,
    published: PublishedFrequency,
    stream: Option<Box<dyn ActiveStream>>,
}

impl<B: AudioBackend> StreamOwner<B> {
    fn run(mut self, control: Receiver<Control>) {
        for message in control.iter() {
            match message {
                Control::Reconfigure(settings, reply) => {
                    let result = self.reopen(&settings);
                    let _ = reply.send(result);
                }
                Control::Stop => break,
            }
        }
        self.close_stream();
        self.published.clear();
        debug!("control thread finished");
    }

    /// Stops the current stream, then opens a fresh one with new state.
    fn reopen(&mut self, settings: &StreamSettings) -> Result<ResolvedStream, TunerError> {
        self.close_stream();
        self.published.clear();

        let result = self.open(settings);
        if let Err(e) = &result {
            warn!("failed to open input stream: {}", e);
        }
        result
    }

    fn open(&mut self, settings: &StreamSettings) -> Result<ResolvedStream, TunerError> {
        let capabilities = self.backend.capabilities(settings.device.as_deref())?;
        let resolved = ResolvedStream::resolve(settings, &capabilities);
        let handler = BlockHandler::new(
            Pipeline::new(&self.config, resolved.sample_rate),
            self.published.clone(),
            resolved.channels as usize,
            resolved.channel_index,
        );
        let stream = self.backend.open(&resolved, handler)?;
        info!(
            "input stream open on {}: {} Hz, {} channel(s), analysing channel {}, block {}",
            capabilities.name,
            resolved.sample_rate,
            resolved.channels,
            resolved.channel_index,
            resolved.block_size
        );
        self.stream = Some(stream);
        Ok(resolved)
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            match stream.close() {
                Ok(()) => info!("input stream closed"),
                Err(e) => warn!("error while closing input stream: {}", e),
            }
        }
    }
}

/// Runs the pitch pipeline on a live input stream.
///
/// Consumers poll [`frequency`](Self::frequency) (or a cloned
/// [`PublishedFrequency`]) on their own schedule.
#[derive(Debug)]
pub struct StreamDriver {
    control: Sender<Control>,
    published: PublishedFrequency,
    worker: Option<JoinHandle<()>>,
    current: ResolvedStream,
}

impl StreamDriver {
    /// Validates `config`, opens the first stream and starts the control thread.
    ///
    /// # Returns
    /// * `Ok(driver)` - Stream is running
    /// * `Err(e)` - Invalid configuration or the device failed to open
    pub fn start<B: AudioBackend>(
        backend: B,
        config: AnalyzerConfig,
        settings: StreamSettings,
    ) -> Result<Self, TunerError> {
        config.validate()?;

        let published = PublishedFrequency::new();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let owner_published = published.clone();
        let worker = thread::Builder::new()
            .name("pitchtrack-audio".into())
            .spawn(move || {
                let mut owner = StreamOwner {
                    backend,
                    config,
                    published: owner_published,
                    stream: None,
                };
                let opened = owner.reopen(&settings);
                let failed = opened.is_err();
                let _ = ready_tx.send(opened);
                if !failed {
                    owner.run(control_rx);
                }
            })
            .map_err(control_thread_error)?;

        let opened = ready_rx.recv().map_err(|_| TunerError::DriverStopped);
        match opened.and_then(|result| result) {
            Ok(current) => Ok(Self {
                control: control_tx,
                published,
                worker: Some(worker),
                current,
            }),
            Err(e) => {
                let _ = worker.join();
                Err(e)
            }
        }
    }

    /// Latest published frequency in Hz, 0 when nothing is detected.
    pub fn frequency(&self) -> f32 {
        self.published.get()
    }

    /// A handle for polling the frequency from another thread.
    pub fn published(&self) -> PublishedFrequency {
        self.published.clone()
    }

    /// Parameters of the stream opened by the last successful (re)configuration.
    pub fn current(&self) -> &ResolvedStream {
        &self.current
    }

    /// Switches device, channel, sample rate or block size.
    ///
    /// The old stream is stopped before anything changes and all analysis
    /// history is dropped. On failure the driver stays alive with no stream
    /// and frequency 0; a later call may succeed.
    pub fn request_reconfigure(
        &mut self,
        settings: StreamSettings,
    ) -> Result<ResolvedStream, TunerError> {
        info!("reconfiguring input: {:?}", settings);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.control
            .send(Control::Reconfigure(settings, reply_tx))
            .map_err(|_| TunerError::DriverStopped)?;
        let resolved = reply_rx.recv().map_err(|_| TunerError::DriverStopped)??;
        self.current = resolved.clone();
        Ok(resolved)
    }

    /// Closes the stream and waits for the control thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.control.send(Control::Stop);
            if worker.join().is_err() {
                warn!("control thread panicked");
            }
        }
        self.published.clear();
    }
}

impl Drop for StreamDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn control_thread_error(err: std::io::Error) -> TunerError {
    TunerError::StreamBuild(format!("failed to spawn control thread: {err}"))
}

/// Error callback for a live CPAL stream.
///
/// Some stream errors (an unplugged device) end the data callbacks for good,
/// so the published value drops to 0 instead of going stale. A later data
/// callback publishes again if the stream recovers.
fn stream_error_handler(
    published: PublishedFrequency,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        warn!("an error occurred on the audio stream: {}", err);
        published.clear();
    }
}

/// Input through the host's default audio API via CPAL.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    fn find_device(device: Option<&str>) -> Result<cpal::Device, TunerError> {
        let host = cpal::default_host();
        match device {
            None => host
                .default_input_device()
                .ok_or_else(|| TunerError::Device("no input device available".into())),
            Some(wanted) => host
                .input_devices()
                .map_err(|e| TunerError::Device(e.to_string()))?
                .find(|d| d.name().map(|name| name == wanted).unwrap_or(false))
                .ok_or_else(|| TunerError::Device(format!("input device `{wanted}` not found"))),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn list_devices(&self) -> Result<Vec<String>, TunerError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| TunerError::Device(e.to_string()))?;
        Ok(devices
            .map(|d| d.name().unwrap_or_else(|_| "Unknown Device".to_string()))
            .collect())
    }

    fn capabilities(&self, device: Option<&str>) -> Result<DeviceCapabilities, TunerError> {
        let device = Self::find_device(device)?;
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());
        let default_config = device
            .default_input_config()
            .map_err(|e| TunerError::Device(e.to_string()))?;
        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(1))
            .unwrap_or_else(|_| default_config.channels());
        Ok(DeviceCapabilities {
            name,
            max_input_channels,
            default_sample_rate: default_config.sample_rate().0,
        })
    }

    fn open(
        &mut self,
        stream: &ResolvedStream,
        mut handler: BlockHandler,
    ) -> Result<Box<dyn ActiveStream>, TunerError> {
        let device = Self::find_device(stream.device.as_deref())?;
        let config = cpal::StreamConfig {
            channels: stream.channels,
            sample_rate: cpal::SampleRate(stream.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(stream.block_size),
        };

        let err_fn = stream_error_handler(handler.published().clone());
        let input = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    handler.handle(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| TunerError::StreamBuild(e.to_string()))?;
        input
            .play()
            .map_err(|e| TunerError::StreamBuild(e.to_string()))?;

        Ok(Box::new(CpalStream { stream: input }))
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl ActiveStream for CpalStream {
    fn close(self: Box<Self>) -> Result<(), TunerError> {
        let CpalStream { stream } = *self;
        // Pausing first stops callbacks; dropping the stream releases the device.
        let paused = stream
            .pause()
            .map_err(|e| TunerError::Device(e.to_string()));
        drop(stream);
        paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(channels: u16) -> DeviceCapabilities {
        DeviceCapabilities {
            name: "test".into(),
            max_input_channels: channels,
            default_sample_rate: 44_100,
        }
    }

    #[test]
    fn published_frequency_round_trips_f32() {
        let published = PublishedFrequency::new();
        assert_eq!(published.get(), 0.0);
        published.set(220.25);
        assert_eq!(published.clone().get(), 220.25);
        published.clear();
        assert_eq!(published.get(), 0.0);
    }

    #[test]
    fn resolve_applies_device_defaults() {
        let resolved = ResolvedStream::resolve(&StreamSettings::default(), &capabilities(2));
        assert_eq!(resolved.sample_rate, 44_100);
        assert_eq!(resolved.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(resolved.channels, 1);
        assert_eq!(resolved.channel_index, 0);
    }

    #[test]
    fn resolve_opens_channels_up_to_selection() {
        let settings = StreamSettings {
            channel_index: 1,
            sample_rate: Some(48_000),
            block_size: Some(1024),
            ..StreamSettings::default()
        };
        let resolved = ResolvedStream::resolve(&settings, &capabilities(4));
        assert_eq!(resolved.channels, 2);
        assert_eq!(resolved.channel_index, 1);
        assert_eq!(resolved.sample_rate, 48_000);
        assert_eq!(resolved.block_size, 1024);
    }

    #[test]
    fn resolve_clamps_channel_to_device() {
        let settings = StreamSettings {
            channel_index: 5,
            ..StreamSettings::default()
        };
        let resolved = ResolvedStream::resolve(&settings, &capabilities(2));
        assert_eq!(resolved.channels, 2);
        assert_eq!(resolved.channel_index, 1);
    }

    #[test]
    fn handler_selects_channel_from_interleaved_input() {
        let config = AnalyzerConfig::default();
        let published = PublishedFrequency::new();
        let mut handler = BlockHandler::new(
            Pipeline::new(&config, 48_000),
            published.clone(),
            2,
            1,
        );
        // Loud on channel 1, silent on channel 0.
        let block: Vec<f32> = (0..4096)
            .flat_map(|i| [0.0, if i % 2 == 0 { 0.5 } else { -0.5 }])
            .collect();
        handler.handle(&block);
        assert_eq!(handler.pipeline().ring().cursor(), 4096);

        // Same block but the selected channel is silent: gated before buffering.
        let mut silent_side = BlockHandler::new(Pipeline::new(&config, 48_000), published, 2, 0);
        assert_eq!(silent_side.handle(&block), FrameOutcome::NoSignal);
        assert_eq!(silent_side.pipeline().ring().cursor(), 0);
    }

    #[test]
    fn panic_in_analysis_resets_pipeline_and_publishes_zero() {
        let config = AnalyzerConfig::default();
        let published = PublishedFrequency::new();
        let mut handler =
            BlockHandler::new(Pipeline::new(&config, 48_000), published.clone(), 1, 0);
        let tone: Vec<f32> = (0..4096 * 4)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 48_000.0).sin())
            .collect();
        for block in tone.chunks(4096) {
            handler.handle(block);
        }
        assert!(published.get() > 0.0);

        handler.fail_next = true;
        assert_eq!(handler.handle(&tone[..4096]), FrameOutcome::NoSignal);
        assert_eq!(published.get(), 0.0);
        assert_eq!(handler.pipeline().ring().cursor(), 0);
        assert!(!handler.pipeline().ring().is_filled());
        assert_eq!(handler.pipeline().stabilizer().hit_count(), 0);

        // The next block is analysed normally again.
        assert_eq!(handler.handle(&tone[..4096]), FrameOutcome::NoSignal);
        assert_eq!(handler.pipeline().ring().cursor(), 4096);
    }

    #[test]
    fn stream_error_clears_published_frequency() {
        let published = PublishedFrequency::new();
        published.set(220.0);
        let mut on_error = stream_error_handler(published.clone());
        on_error(cpal::StreamError::DeviceNotAvailable);
        assert_eq!(published.get(), 0.0);
    }

    #[test]
    fn spawn_failure_is_a_stream_error() {
        let err = control_thread_error(std::io::Error::other("out of threads"));
        assert!(matches!(err, TunerError::StreamBuild(_)));
        assert!(err.to_string().contains("control thread"));
    }
}
