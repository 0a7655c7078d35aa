//! Audio capture from an input device
//!
//! The cpal callback hands variable-sized blocks to the reader through a
//! bounded channel; [`CaptureStream::read_chunk`] reassembles them into
//! fixed-size chunks.

use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::device::{spawn_stream, DeviceHandle};
use crate::audio::format::{encode_samples, AudioFormat};
use crate::constants::CAPTURE_QUEUE_BLOCKS;
use crate::error::AudioError;

/// Open input stream producing fixed-size chunks
pub struct CaptureStream {
    device_name: String,
    format: AudioFormat,

    /// Blocks delivered by the stream callback
    blocks: Receiver<Vec<i16>>,

    /// Errors reported by cpal
    errors: Receiver<AudioError>,

    /// Samples received but not yet returned
    pending: Mutex<VecDeque<i16>>,

    /// Dropped on close; wakes the stream thread and blocked readers
    close_tx: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,

    thread_handle: Mutex<Option<JoinHandle<()>>>,

    /// Blocks discarded because the reader fell behind
    overflows: Arc<AtomicU64>,
}

impl CaptureStream {
    /// Open `handle` for capture at `format`
    pub fn open(handle: DeviceHandle, format: AudioFormat) -> Result<Self, AudioError> {
        let device_name = handle.name().to_string();
        let (config, sample_format) = handle.stream_config(&format)?;

        let (block_tx, block_rx) = bounded::<Vec<i16>>(CAPTURE_QUEUE_BLOCKS);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (close_tx, close_rx) = bounded::<()>(0);
        let overflows = Arc::new(AtomicU64::new(0));

        let oldest = block_rx.clone();
        let overflow_counter = overflows.clone();
        let thread_handle = spawn_stream(
            "audio-capture".to_string(),
            move || {
                let device = handle.into_inner();
                let sink = BlockSink {
                    blocks: block_tx,
                    oldest,
                    overflows: overflow_counter,
                };
                match sample_format {
                    SampleFormat::I16 => build_input::<i16>(&device, &config, sink, error_tx),
                    SampleFormat::F32 => build_input::<f32>(&device, &config, sink, error_tx),
                    SampleFormat::I32 => build_input::<i32>(&device, &config, sink, error_tx),
                    SampleFormat::U16 => build_input::<u16>(&device, &config, sink, error_tx),
                    other => Err(AudioError::DeviceUnavailable(format!(
                        "unsupported sample format {}",
                        other
                    ))),
                }
            },
            close_rx.clone(),
        )?;

        tracing::info!(
            "Capture opened on '{}' ({}, native {})",
            device_name,
            format,
            sample_format
        );

        Ok(Self {
            device_name,
            format,
            blocks: block_rx,
            errors: error_rx,
            pending: Mutex::new(VecDeque::with_capacity(format.chunk_samples() * 2)),
            close_tx: Mutex::new(Some(close_tx)),
            closed: close_rx,
            thread_handle: Mutex::new(Some(thread_handle)),
            overflows,
        })
    }

    /// Block until one full chunk is captured and write it into `buf`
    pub fn read_chunk(&self, buf: &mut [u8]) -> Result<(), AudioError> {
        let expected = self.format.chunk_bytes();
        if buf.len() != expected {
            return Err(AudioError::ChunkSize {
                expected,
                actual: buf.len(),
            });
        }

        let needed = self.format.chunk_samples();
        let mut pending = self.pending.lock();

        while pending.len() < needed {
            if self.is_closed() {
                return Err(AudioError::Closed);
            }
            select! {
                recv(self.blocks) -> block => match block {
                    Ok(block) => pending.extend(block),
                    Err(_) => return Err(self.disconnected()),
                },
                recv(self.errors) -> err => {
                    return Err(err.unwrap_or_else(|_| self.disconnected()));
                }
                recv(self.closed) -> _ => return Err(AudioError::Closed),
            }
        }

        let samples: Vec<i16> = pending.drain(..needed).collect();
        encode_samples(&samples, buf);
        Ok(())
    }

    /// Stop the stream. Blocked readers return [`AudioError::Closed`].
    pub fn close(&self) {
        let Some(close_tx) = self.close_tx.lock().take() else {
            return;
        };
        drop(close_tx);

        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
        tracing::debug!(
            "Capture on '{}' closed, {} blocks dropped",
            self.device_name,
            self.overflow_count()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx.lock().is_none()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Callback blocks dropped because the reader fell behind
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    fn disconnected(&self) -> AudioError {
        if self.is_closed() {
            AudioError::Closed
        } else {
            AudioError::DeviceUnavailable(format!("capture stream on '{}' ended", self.device_name))
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Callback side of the block queue
struct BlockSink {
    blocks: Sender<Vec<i16>>,
    oldest: Receiver<Vec<i16>>,
    overflows: Arc<AtomicU64>,
}

impl BlockSink {
    fn push(&self, block: Vec<i16>) {
        if let Err(TrySendError::Full(block)) = self.blocks.try_send(block) {
            // Drop the oldest block so capture stays close to real time.
            self.overflows.fetch_add(1, Ordering::Relaxed);
            let _ = self.oldest.try_recv();
            let _ = self.blocks.try_send(block);
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: BlockSink,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                sink.push(data.iter().map(|s| i16::from_sample(*s)).collect());
            },
            move |err| {
                let _ = errors.try_send(AudioError::DeviceUnavailable(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{DeviceCatalog, Direction};

    #[test]
    fn test_block_sink_drops_oldest() {
        let (tx, rx) = bounded::<Vec<i16>>(2);
        let sink = BlockSink {
            blocks: tx,
            oldest: rx.clone(),
            overflows: Arc::new(AtomicU64::new(0)),
        };

        sink.push(vec![1]);
        sink.push(vec![2]);
        sink.push(vec![3]);

        assert_eq!(sink.overflows.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
        assert_eq!(rx.try_recv().unwrap(), vec![3]);
    }

    #[test]
    fn test_capture_on_default_device() {
        // Only meaningful where an input device exists; CI machines usually have none.
        let Ok(handle) = DeviceCatalog::new().select(None, Direction::Input) else {
            return;
        };
        if let Ok(capture) = CaptureStream::open(handle, AudioFormat::default()) {
            capture.close();
            let mut buf = vec![0u8; AudioFormat::default().chunk_bytes()];
            assert!(matches!(capture.read_chunk(&mut buf), Err(AudioError::Closed)));
        }
    }
}
