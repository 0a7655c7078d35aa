//! Hardware-backed [`AudioDevice`]: one capture and one playback stream

use crate::audio::capture::CaptureStream;
use crate::audio::device::DeviceHandle;
use crate::audio::format::AudioFormat;
use crate::audio::playback::PlaybackStream;
use crate::audio::AudioDevice;
use crate::error::AudioError;

/// Capture and playback streams opened with one shared format
pub struct DuplexDevice {
    format: AudioFormat,
    capture: Option<CaptureStream>,
    playback: Option<PlaybackStream>,
}

impl DuplexDevice {
    /// Open the given devices. Either side may be omitted when the service
    /// does not share or does not listen.
    pub fn open(
        format: AudioFormat,
        input: Option<DeviceHandle>,
        output: Option<DeviceHandle>,
    ) -> Result<Self, AudioError> {
        let capture = input
            .map(|handle| CaptureStream::open(handle, format))
            .transpose()?;
        let playback = output
            .map(|handle| PlaybackStream::open(handle, format))
            .transpose()?;

        Ok(Self {
            format,
            capture,
            playback,
        })
    }
}

impl AudioDevice for DuplexDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&self, buf: &mut [u8]) -> Result<(), AudioError> {
        match &self.capture {
            Some(capture) => capture.read_chunk(buf),
            None => Err(AudioError::DeviceUnavailable("no input stream open".to_string())),
        }
    }

    fn write_chunk(&self, buf: &[u8]) -> Result<(), AudioError> {
        match &self.playback {
            Some(playback) => playback.write_chunk(buf),
            None => Err(AudioError::DeviceUnavailable("no output stream open".to_string())),
        }
    }

    fn close(&self) {
        if let Some(capture) = &self.capture {
            capture.close();
        }
        if let Some(playback) = &self.playback {
            playback.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sides_are_unavailable() {
        let device = DuplexDevice::open(AudioFormat::default(), None, None).unwrap();
        let mut buf = vec![0u8; device.format().chunk_bytes()];

        assert!(matches!(
            device.read_chunk(&mut buf),
            Err(AudioError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            device.write_chunk(&buf),
            Err(AudioError::DeviceUnavailable(_))
        ));

        device.close();
        device.close();
    }
}
