//! cpal-based [`DeviceBackend`] implementation.
//!
//! Wraps [cpal](https://crates.io/crates/cpal) for cross-platform device
//! enumeration and stream construction: ALSA on Linux, CoreAudio on macOS,
//! WASAPI on Windows. Streams are requested in f32; the device's own
//! converter handles anything the hardware wants natively.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::device::{
    DeviceBackend, DeviceFormat, DeviceInfo, InputCallback, OutputCallback, SampleFormat,
    StreamConfig, StreamHandle,
};
use crate::error::{AudioError, Result};

/// The default backend, holding a cpal [`cpal::Host`].
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    /// A backend on the platform's default audio host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        CpalBackend { host }
    }

    fn find_output(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) if !search.is_empty() => {
                let lower = search.to_lowercase();
                let devices = self
                    .host
                    .output_devices()
                    .map_err(|e| AudioError::Device(e.to_string()))?;
                for device in devices {
                    if let Ok(device_name) = device.name()
                        && device_name.to_lowercase().contains(&lower)
                    {
                        return Ok(device);
                    }
                }
                Err(AudioError::DeviceNotFound(search.to_owned()))
            }
            _ => self
                .host
                .default_output_device()
                .ok_or(AudioError::NoDevice),
        }
    }

    fn find_input(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) if !search.is_empty() => {
                let lower = search.to_lowercase();
                let devices = self
                    .host
                    .input_devices()
                    .map_err(|e| AudioError::Device(e.to_string()))?;
                for device in devices {
                    if let Ok(device_name) = device.name()
                        && device_name.to_lowercase().contains(&lower)
                    {
                        return Ok(device);
                    }
                }
                Err(AudioError::DeviceNotFound(search.to_owned()))
            }
            _ => self
                .host
                .default_input_device()
                .ok_or(AudioError::NoDevice),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        CpalBackend::new()
    }
}

fn sample_format_of(format: cpal::SampleFormat) -> SampleFormat {
    match format {
        cpal::SampleFormat::I16 => SampleFormat::S16,
        cpal::SampleFormat::I32 => SampleFormat::S32,
        cpal::SampleFormat::F32 => SampleFormat::F32,
        _ => SampleFormat::F32,
    }
}

fn info_for(device: &cpal::Device, is_default: bool, input: bool) -> Option<DeviceInfo> {
    let name = device.name().ok()?;
    let configs: Vec<DeviceFormat> = if input {
        device
            .supported_input_configs()
            .ok()?
            .flat_map(expand_config)
            .collect()
    } else {
        device
            .supported_output_configs()
            .ok()?
            .flat_map(expand_config)
            .collect()
    };
    Some(DeviceInfo {
        name,
        is_default,
        native_formats: configs,
    })
}

/// Expands a supported-config range into concrete triples at the common
/// rates it spans.
fn expand_config(range: cpal::SupportedStreamConfigRange) -> Vec<DeviceFormat> {
    let min = range.min_sample_rate().0;
    let max = range.max_sample_rate().0;
    crate::graph::PRIORITIZED_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| *rate >= min && *rate <= max)
        .map(|rate| DeviceFormat {
            sample_format: sample_format_of(range.sample_format()),
            channels: u32::from(range.channels()),
            sample_rate: rate,
        })
        .collect()
}

impl DeviceBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn list_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok());
        let devices = self
            .host
            .output_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        Ok(devices
            .filter_map(|d| {
                let is_default = d.name().ok() == default_name;
                info_for(&d, is_default, false)
            })
            .collect())
    }

    fn list_input_devices(&self) -> Result<Vec<DeviceInfo>> {
        let default_name = self
            .host
            .default_input_device()
            .and_then(|d| d.name().ok());
        let devices = self
            .host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        Ok(devices
            .filter_map(|d| {
                let is_default = d.name().ok() == default_name;
                info_for(&d, is_default, true)
            })
            .collect())
    }

    fn build_output_stream(
        &self,
        config: &StreamConfig,
        mut callback: OutputCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_output(config.device_name.as_deref())?;
        let stream_config = cpal::StreamConfig {
            channels: config.format.channels as u16,
            sample_rate: cpal::SampleRate(config.format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames),
        };
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                |err| tracing::error!(error = %err, "output stream error"),
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?;
        stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
        tracing::info!(
            channels = config.format.channels,
            sample_rate = config.format.sample_rate,
            "output stream started"
        );
        Ok(StreamHandle::new(stream))
    }

    fn build_input_stream(
        &self,
        config: &StreamConfig,
        mut callback: InputCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_input(config.device_name.as_deref())?;
        let stream_config = cpal::StreamConfig {
            channels: config.format.channels as u16,
            sample_rate: cpal::SampleRate(config.format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames),
        };
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| callback(data),
                |err| tracing::error!(error = %err, "input stream error"),
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?;
        stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
        tracing::info!(
            channels = config.format.channels,
            sample_rate = config.format.sample_rate,
            "input stream started"
        );
        Ok(StreamHandle::new(stream))
    }
}
