//! The audio device abstraction.
//!
//! [`DeviceBackend`] decouples the graph from any platform audio API:
//! enumeration returns [`DeviceInfo`]s with their native format triples,
//! and stream construction takes a negotiated [`StreamConfig`] plus a boxed
//! callback. The default implementation wraps cpal (feature
//! `cpal-backend`); [`MockBackend`] drives tests deterministically.
//!
//! Callbacks use boxed closures so the trait stays object-safe, and streams
//! are returned as type-erased [`StreamHandle`]s that stop on drop.

use std::sync::{Arc, Mutex};

use crate::error::{AudioError, Result};

/// Sample formats a device may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit float (the graph's client format).
    F32,
    /// 16-bit signed integer.
    S16,
    /// 24-bit signed integer.
    S24,
    /// 32-bit signed integer.
    S32,
}

/// One (format, channels, sample-rate) triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFormat {
    /// Sample format.
    pub sample_format: SampleFormat,
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// One enumerated device.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Backend device name.
    pub name: String,
    /// True for the system default device.
    pub is_default: bool,
    /// Native format triples, in backend order.
    pub native_formats: Vec<DeviceFormat>,
}

impl DeviceInfo {
    /// True if any native triple carries `sample_rate`.
    pub fn is_native_sample_rate(&self, sample_rate: u32) -> bool {
        self.native_formats
            .iter()
            .any(|f| f.sample_rate == sample_rate)
    }
}

/// Picks the native format closest to `requested`.
///
/// Exact (channels, rate) matches win; then an exact rate with different
/// channels; then the rate minimizing distance to the request, which means
/// the device's converter must resample. Returns the chosen format and
/// whether resampling is required.
pub fn negotiate_format(info: &DeviceInfo, requested: &DeviceFormat) -> (DeviceFormat, bool) {
    if info.native_formats.is_empty() {
        return (*requested, false);
    }
    if let Some(exact) = info
        .native_formats
        .iter()
        .find(|f| f.sample_rate == requested.sample_rate && f.channels == requested.channels)
    {
        return (*exact, false);
    }
    if let Some(rate_match) = info
        .native_formats
        .iter()
        .find(|f| f.sample_rate == requested.sample_rate)
    {
        return (*rate_match, false);
    }
    let closest = info
        .native_formats
        .iter()
        .min_by_key(|f| f.sample_rate.abs_diff(requested.sample_rate))
        .expect("non-empty checked above");
    (*closest, true)
}

/// Configuration for building one stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// The negotiated device-side format.
    pub format: DeviceFormat,
    /// Preferred buffer size in frames.
    pub buffer_frames: u32,
    /// Device name filter (`None` uses the default device).
    pub device_name: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            format: DeviceFormat {
                sample_format: SampleFormat::F32,
                channels: 2,
                sample_rate: 48_000,
            },
            buffer_frames: 512,
            device_name: None,
        }
    }
}

/// Playback callback: fill the interleaved output buffer.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Capture callback: consume the interleaved input buffer.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Type-erased stream handle; the stream runs until this is dropped.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        StreamHandle {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// The pluggable audio backend.
pub trait DeviceBackend: Send {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Enumerates playback devices.
    fn list_output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Enumerates capture devices.
    fn list_input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Builds and starts a playback stream.
    fn build_output_stream(
        &self,
        config: &StreamConfig,
        callback: OutputCallback,
    ) -> Result<StreamHandle>;

    /// Builds and starts a capture stream.
    fn build_input_stream(
        &self,
        config: &StreamConfig,
        callback: InputCallback,
    ) -> Result<StreamHandle>;
}

/// Finds a device by name (case-insensitive substring), or the default.
pub fn find_device<'a>(
    devices: &'a [DeviceInfo],
    name: Option<&str>,
) -> Result<&'a DeviceInfo> {
    match name {
        Some(search) if !search.is_empty() => {
            let lower = search.to_lowercase();
            devices
                .iter()
                .find(|d| d.name.to_lowercase().contains(&lower))
                .ok_or_else(|| AudioError::DeviceNotFound(search.to_owned()))
        }
        _ => devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .ok_or(AudioError::NoDevice),
    }
}

// --- Mock backend ---

enum MockStream {
    Output {
        channels: u32,
        callback: OutputCallback,
        alive: Arc<Mutex<bool>>,
    },
    Input {
        channels: u32,
        callback: InputCallback,
        alive: Arc<Mutex<bool>>,
    },
}

/// Drops mark the mock stream dead, mirroring real stream teardown.
struct MockStreamGuard {
    alive: Arc<Mutex<bool>>,
}

impl Drop for MockStreamGuard {
    fn drop(&mut self) {
        *self.alive.lock().expect("mock stream lock") = false;
    }
}

#[derive(Default)]
struct MockShared {
    streams: Vec<MockStream>,
}

/// A deterministic in-memory backend for tests and headless runs.
///
/// Streams do nothing until pumped: [`MockBackend::pump_output`] invokes
/// every live playback callback and returns the rendered buffers;
/// [`MockBackend::push_input`] feeds every live capture callback.
#[derive(Clone)]
pub struct MockBackend {
    outputs: Vec<DeviceInfo>,
    inputs: Vec<DeviceInfo>,
    shared: Arc<Mutex<MockShared>>,
    /// Device names whose stream construction should fail.
    failing: Vec<String>,
}

impl MockBackend {
    /// A backend advertising the given devices.
    pub fn new(outputs: Vec<DeviceInfo>, inputs: Vec<DeviceInfo>) -> Self {
        MockBackend {
            outputs,
            inputs,
            shared: Arc::new(Mutex::new(MockShared::default())),
            failing: Vec::new(),
        }
    }

    /// A backend with one default stereo output and one default mono input,
    /// both native at 48 kHz and 44.1 kHz.
    pub fn stereo_defaults() -> Self {
        let formats = |channels| {
            vec![
                DeviceFormat {
                    sample_format: SampleFormat::F32,
                    channels,
                    sample_rate: 48_000,
                },
                DeviceFormat {
                    sample_format: SampleFormat::F32,
                    channels,
                    sample_rate: 44_100,
                },
            ]
        };
        MockBackend::new(
            vec![DeviceInfo {
                name: "mock-out".to_owned(),
                is_default: true,
                native_formats: formats(2),
            }],
            vec![DeviceInfo {
                name: "mock-in".to_owned(),
                is_default: true,
                native_formats: formats(1),
            }],
        )
    }

    /// Makes stream construction fail for the named device.
    pub fn fail_device(&mut self, name: impl Into<String>) {
        self.failing.push(name.into());
    }

    /// Invokes every live playback callback for `frames` frames; returns
    /// each rendered interleaved buffer.
    pub fn pump_output(&self, frames: usize) -> Vec<Vec<f32>> {
        let mut shared = self.shared.lock().expect("mock backend lock");
        let mut rendered = Vec::new();
        for stream in &mut shared.streams {
            if let MockStream::Output {
                channels,
                callback,
                alive,
            } = stream
                && *alive.lock().expect("mock stream lock")
            {
                let mut buffer = vec![0.0f32; frames * *channels as usize];
                callback(&mut buffer);
                rendered.push(buffer);
            }
        }
        rendered
    }

    /// Feeds `samples` (interleaved) to every live capture callback.
    pub fn push_input(&self, samples: &[f32]) {
        let mut shared = self.shared.lock().expect("mock backend lock");
        for stream in &mut shared.streams {
            if let MockStream::Input {
                callback, alive, ..
            } = stream
                && *alive.lock().expect("mock stream lock")
            {
                callback(samples);
            }
        }
    }

    /// Number of live streams (both directions).
    pub fn live_stream_count(&self) -> usize {
        let shared = self.shared.lock().expect("mock backend lock");
        shared
            .streams
            .iter()
            .filter(|s| match s {
                MockStream::Output { alive, .. } | MockStream::Input { alive, .. } => {
                    *alive.lock().expect("mock stream lock")
                }
            })
            .count()
    }

    fn check_failing(&self, config: &StreamConfig) -> Result<()> {
        if let Some(name) = &config.device_name
            && self.failing.iter().any(|f| f == name)
        {
            return Err(AudioError::Device(format!(
                "mock failure opening '{name}'"
            )));
        }
        Ok(())
    }
}

impl DeviceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn list_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.outputs.clone())
    }

    fn list_input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.inputs.clone())
    }

    fn build_output_stream(
        &self,
        config: &StreamConfig,
        callback: OutputCallback,
    ) -> Result<StreamHandle> {
        self.check_failing(config)?;
        let alive = Arc::new(Mutex::new(true));
        self.shared
            .lock()
            .expect("mock backend lock")
            .streams
            .push(MockStream::Output {
                channels: config.format.channels,
                callback,
                alive: Arc::clone(&alive),
            });
        Ok(StreamHandle::new(MockStreamGuard { alive }))
    }

    fn build_input_stream(
        &self,
        config: &StreamConfig,
        callback: InputCallback,
    ) -> Result<StreamHandle> {
        self.check_failing(config)?;
        let alive = Arc::new(Mutex::new(true));
        self.shared
            .lock()
            .expect("mock backend lock")
            .streams
            .push(MockStream::Input {
                channels: config.format.channels,
                callback,
                alive: Arc::clone(&alive),
            });
        Ok(StreamHandle::new(MockStreamGuard { alive }))
    }
}
