//! In-process [`AudioDevice`]
//!
//! Capture is fed through a [`MemoryFeed`] and playback lands in a
//! [`MemoryTap`]. Dropping every feed behaves like pulling the microphone:
//! pending reads fail with [`AudioError::DeviceUnavailable`]. Same for the tap
//! and writes.

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::audio::AudioDevice;
use crate::error::AudioError;

/// Audio device backed by channels
pub struct MemoryDevice {
    format: AudioFormat,
    captured: Receiver<Vec<u8>>,
    pending: Mutex<Vec<u8>>,
    played: Sender<Vec<u8>>,
    close_tx: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

/// Producer side of a [`MemoryDevice`] capture path
#[derive(Clone)]
pub struct MemoryFeed {
    tx: Sender<Vec<u8>>,
    format: AudioFormat,
}

/// Consumer side of a [`MemoryDevice`] playback path
pub struct MemoryTap {
    rx: Receiver<Vec<u8>>,
}

impl MemoryDevice {
    pub fn new(format: AudioFormat) -> (Self, MemoryFeed, MemoryTap) {
        let (capture_tx, capture_rx) = unbounded();
        let (play_tx, play_rx) = unbounded();
        let (close_tx, close_rx) = bounded::<()>(0);

        let device = Self {
            format,
            captured: capture_rx,
            pending: Mutex::new(Vec::with_capacity(format.chunk_bytes() * 2)),
            played: play_tx,
            close_tx: Mutex::new(Some(close_tx)),
            closed: close_rx,
        };

        (
            device,
            MemoryFeed {
                tx: capture_tx,
                format,
            },
            MemoryTap { rx: play_rx },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx.lock().is_none()
    }
}

impl AudioDevice for MemoryDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&self, buf: &mut [u8]) -> Result<(), AudioError> {
        let expected = self.format.chunk_bytes();
        if buf.len() != expected {
            return Err(AudioError::ChunkSize {
                expected,
                actual: buf.len(),
            });
        }

        let mut pending = self.pending.lock();
        while pending.len() < expected {
            if self.is_closed() {
                return Err(AudioError::Closed);
            }
            select! {
                recv(self.captured) -> bytes => match bytes {
                    Ok(bytes) => pending.extend_from_slice(&bytes),
                    Err(_) => {
                        return Err(AudioError::DeviceUnavailable("capture feed disconnected".to_string()));
                    }
                },
                recv(self.closed) -> _ => return Err(AudioError::Closed),
            }
        }

        buf.copy_from_slice(&pending[..expected]);
        pending.drain(..expected);
        Ok(())
    }

    fn write_chunk(&self, buf: &[u8]) -> Result<(), AudioError> {
        let expected = self.format.chunk_bytes();
        if buf.len() != expected {
            return Err(AudioError::ChunkSize {
                expected,
                actual: buf.len(),
            });
        }
        if self.is_closed() {
            return Err(AudioError::Closed);
        }

        self.played
            .send(buf.to_vec())
            .map_err(|_| AudioError::DeviceUnavailable("playback tap disconnected".to_string()))
    }

    fn close(&self) {
        self.close_tx.lock().take();
    }
}

impl MemoryFeed {
    /// Queue raw bytes for capture; they may span or split chunks
    pub fn push(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.tx.send(bytes.into()).is_ok()
    }

    /// Queue `chunks` chunks of silence
    pub fn push_silence(&self, chunks: usize) -> bool {
        (0..chunks).all(|_| self.push(vec![0u8; self.format.chunk_bytes()]))
    }
}

impl MemoryTap {
    /// Next played chunk, or `None` on timeout or after the device is gone
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Chunks played so far, without waiting
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_format() -> AudioFormat {
        AudioFormat::new(1, 8000, 4)
    }

    #[test]
    fn test_reassembles_chunks() {
        let (device, feed, _tap) = MemoryDevice::new(small_format());

        feed.push(vec![1, 2, 3]);
        feed.push(vec![4, 5, 6, 7, 8, 9, 10]);

        let mut buf = [0u8; 8];
        device.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);

        feed.push(vec![11, 12, 13, 14, 15, 16]);
        device.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn test_close_unblocks_reader() {
        let (device, _feed, _tap) = MemoryDevice::new(small_format());
        let device = Arc::new(device);

        let reader = device.clone();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read_chunk(&mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        device.close();
        device.close();

        assert!(matches!(handle.join().unwrap(), Err(AudioError::Closed)));
        assert!(matches!(device.write_chunk(&[0u8; 8]), Err(AudioError::Closed)));
    }

    #[test]
    fn test_pulled_feed_is_device_failure() {
        let (device, feed, tap) = MemoryDevice::new(small_format());
        drop(feed);
        drop(tap);

        let mut buf = [0u8; 8];
        assert!(matches!(
            device.read_chunk(&mut buf),
            Err(AudioError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            device.write_chunk(&buf),
            Err(AudioError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_chunk_size() {
        let (device, _feed, tap) = MemoryDevice::new(small_format());

        assert!(matches!(
            device.write_chunk(&[0u8; 3]),
            Err(AudioError::ChunkSize { expected: 8, actual: 3 })
        ));
        device.write_chunk(&[7u8; 8]).unwrap();
        assert_eq!(tap.drain(), vec![vec![7u8; 8]]);
    }
}
