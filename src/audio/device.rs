//! Audio device enumeration and name resolution

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver};
use std::fmt;
use std::thread::{self, JoinHandle};

use crate::audio::format::AudioFormat;
use crate::error::AudioError;

/// Native sample formats we can convert from/to, in order of preference
const PREFERRED_FORMATS: [SampleFormat; 4] = [
    SampleFormat::I16,
    SampleFormat::F32,
    SampleFormat::I32,
    SampleFormat::U16,
];

/// Which side of a device a stream is opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Wrapper around a resolved cpal device
pub struct DeviceHandle {
    inner: cpal::Device,
    name: String,
    direction: Direction,
}

impl DeviceHandle {
    pub fn from_cpal(device: cpal::Device, direction: Direction) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            direction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Pick a stream configuration that carries `format`.
    ///
    /// The channel count and rate must match exactly; the native sample type
    /// may differ and is converted in the stream callback.
    pub fn stream_config(&self, format: &AudioFormat) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = match self.direction {
            Direction::Input => self.inner.supported_input_configs().map(|iter| iter.collect()),
            Direction::Output => self.inner.supported_output_configs().map(|iter| iter.collect()),
        }
        .map_err(|e| AudioError::DeviceUnavailable(format!("{}: {}", self.name, e)))?;

        let rate = cpal::SampleRate(format.sample_rate);
        let candidates: Vec<&cpal::SupportedStreamConfigRange> = ranges
            .iter()
            .filter(|r| {
                r.channels() == format.channels
                    && r.min_sample_rate() <= rate
                    && rate <= r.max_sample_rate()
            })
            .collect();

        let chosen = PREFERRED_FORMATS
            .iter()
            .find_map(|sf| candidates.iter().find(|r| r.sample_format() == *sf))
            .ok_or_else(|| {
                AudioError::DeviceUnavailable(format!(
                    "{} cannot open {} at {}",
                    self.name, self.direction, format
                ))
            })?;

        let supported = (*chosen).clone().with_sample_rate(rate);
        let frames = format.chunk_frames as u32;
        let buffer_size = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
                BufferSize::Fixed(frames)
            }
            _ => BufferSize::Default,
        };

        Ok((
            StreamConfig {
                channels: format.channels,
                sample_rate: rate,
                buffer_size,
            },
            supported.sample_format(),
        ))
    }
}

/// Build and play a stream on a dedicated thread.
///
/// cpal streams are not `Send` on every host, so the stream never leaves the
/// thread that built it. The thread parks until every sender of `closed` is
/// dropped, then drops the stream. Build and play failures are reported
/// before this returns.
pub(crate) fn spawn_stream<F>(
    thread_name: String,
    build: F,
    closed: Receiver<()>,
) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream
                    .play()
                    .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
                Ok(stream)
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let _ = closed.recv();
            drop(stream);
        })
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(AudioError::DeviceUnavailable("stream thread exited".to_string()))
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Device summary for listings
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Enumerates and resolves devices of the default cpal host
pub struct DeviceCatalog {
    host: cpal::Host,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn host_name(&self) -> &'static str {
        self.host.id().name()
    }

    /// List all available audio devices, merging input and output entries by name
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = Vec::new();

        let default_input_name = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = self.host.default_output_device().and_then(|d| d.name().ok());

        if let Ok(input_devices) = self.host.input_devices() {
            for device in input_devices {
                if let Ok(name) = device.name() {
                    let (sample_rates, channels) = get_device_capabilities(&device, Direction::Input);
                    devices.push(DeviceInfo {
                        is_default: default_input_name.as_ref() == Some(&name),
                        name,
                        is_input: true,
                        is_output: false,
                        sample_rates,
                        channels,
                    });
                }
            }
        }

        if let Ok(output_devices) = self.host.output_devices() {
            for device in output_devices {
                if let Ok(name) = device.name() {
                    let is_default = default_output_name.as_ref() == Some(&name);

                    if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                        existing.is_output = true;
                        existing.is_default |= is_default;
                    } else {
                        let (sample_rates, channels) =
                            get_device_capabilities(&device, Direction::Output);
                        devices.push(DeviceInfo {
                            name,
                            is_input: false,
                            is_output: true,
                            is_default,
                            sample_rates,
                            channels,
                        });
                    }
                }
            }
        }

        devices
    }

    /// Find a device by its exact name
    pub fn resolve(&self, name: &str, direction: Direction) -> Result<DeviceHandle, AudioError> {
        let devices = match direction {
            Direction::Input => self.host.input_devices(),
            Direction::Output => self.host.output_devices(),
        }
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(DeviceHandle::from_cpal(device, direction));
            }
        }

        Err(AudioError::DeviceNotFound(format!("{} device '{}'", direction, name)))
    }

    pub fn default_input(&self) -> Result<DeviceHandle, AudioError> {
        self.host
            .default_input_device()
            .map(|d| DeviceHandle::from_cpal(d, Direction::Input))
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
    }

    pub fn default_output(&self) -> Result<DeviceHandle, AudioError> {
        self.host
            .default_output_device()
            .map(|d| DeviceHandle::from_cpal(d, Direction::Output))
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
    }

    /// Resolve a configured name, falling back to the default device when it is
    /// absent or unknown.
    pub fn select(&self, name: Option<&str>, direction: Direction) -> Result<DeviceHandle, AudioError> {
        if let Some(name) = name {
            match self.resolve(name, direction) {
                Ok(handle) => return Ok(handle),
                Err(e) => tracing::warn!("{}, using the default {} device", e, direction),
            }
        }

        match direction {
            Direction::Input => self.default_input(),
            Direction::Output => self.default_output(),
        }
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in &configs {
        for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }

        let ch = config.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_device_is_not_found() {
        // Works with or without audio hardware: no device has this name.
        let catalog = DeviceCatalog::new();
        let result = catalog.resolve("no such device \u{1f50a}", Direction::Input);
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_listing_is_consistent() {
        let catalog = DeviceCatalog::new();
        for device in catalog.list() {
            assert!(device.is_input || device.is_output);
            let mut sorted = device.sample_rates.clone();
            sorted.sort();
            assert_eq!(sorted, device.sample_rates);
        }
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Input.to_string(), "input");
        assert_eq!(Direction::Output.to_string(), "output");
    }
}
