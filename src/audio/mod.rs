//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod duplex;
pub mod format;
pub mod memory;
pub mod playback;

pub use capture::CaptureStream;
pub use device::{DeviceCatalog, DeviceHandle, DeviceInfo, Direction};
pub use duplex::DuplexDevice;
pub use format::AudioFormat;
pub use memory::{MemoryDevice, MemoryFeed, MemoryTap};
pub use playback::PlaybackStream;

use crate::error::AudioError;

/// Blocking chunk I/O against an opened audio device.
///
/// Capture and playback are used from different threads at the same time, so
/// every method takes `&self`. `close` may be called from any thread and must
/// make in-flight `read_chunk`/`write_chunk` calls return
/// [`AudioError::Closed`] promptly. Calling it again does nothing.
pub trait AudioDevice: Send + Sync {
    /// Format every chunk is exchanged in
    fn format(&self) -> AudioFormat;

    /// Block until one chunk of captured audio fills `buf`
    fn read_chunk(&self, buf: &mut [u8]) -> Result<(), AudioError>;

    /// Block until `buf` is accepted for playback
    fn write_chunk(&self, buf: &[u8]) -> Result<(), AudioError>;

    /// Release the streams
    fn close(&self);
}
