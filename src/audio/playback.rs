//! Audio playback to an output device

use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::device::{spawn_stream, DeviceHandle};
use crate::audio::format::{decode_samples, AudioFormat};
use crate::constants::PLAYBACK_QUEUE_CHUNKS;
use crate::error::AudioError;

/// Open output stream accepting fixed-size chunks
pub struct PlaybackStream {
    device_name: String,
    format: AudioFormat,
    chunks: Sender<Vec<i16>>,
    errors: Receiver<AudioError>,
    close_tx: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    /// Callbacks that had to fill with silence
    underruns: Arc<AtomicU64>,
}

impl PlaybackStream {
    /// Open `handle` for playback at `format`
    pub fn open(handle: DeviceHandle, format: AudioFormat) -> Result<Self, AudioError> {
        let device_name = handle.name().to_string();
        let (config, sample_format) = handle.stream_config(&format)?;

        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(PLAYBACK_QUEUE_CHUNKS);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (close_tx, close_rx) = bounded::<()>(0);
        let underruns = Arc::new(AtomicU64::new(0));

        let underrun_counter = underruns.clone();
        let thread_handle = spawn_stream(
            "audio-playback".to_string(),
            move || {
                let device = handle.into_inner();
                let source = ChunkSource {
                    chunks: chunk_rx,
                    queue: VecDeque::new(),
                    underruns: underrun_counter,
                };
                match sample_format {
                    SampleFormat::I16 => build_output::<i16>(&device, &config, source, error_tx),
                    SampleFormat::F32 => build_output::<f32>(&device, &config, source, error_tx),
                    SampleFormat::I32 => build_output::<i32>(&device, &config, source, error_tx),
                    SampleFormat::U16 => build_output::<u16>(&device, &config, source, error_tx),
                    other => Err(AudioError::DeviceUnavailable(format!(
                        "unsupported sample format {}",
                        other
                    ))),
                }
            },
            close_rx.clone(),
        )?;

        tracing::info!(
            "Playback opened on '{}' ({}, native {})",
            device_name,
            format,
            sample_format
        );

        Ok(Self {
            device_name,
            format,
            chunks: chunk_tx,
            errors: error_rx,
            close_tx: Mutex::new(Some(close_tx)),
            closed: close_rx,
            thread_handle: Mutex::new(Some(thread_handle)),
            underruns,
        })
    }

    /// Queue one chunk, blocking while the output queue is full
    pub fn write_chunk(&self, buf: &[u8]) -> Result<(), AudioError> {
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
        if let Ok(err) = self.errors.try_recv() {
            return Err(err);
        }

        let samples = decode_samples(buf);
        select! {
            send(self.chunks, samples) -> sent => sent.map_err(|_| self.disconnected()),
            recv(self.errors) -> err => Err(err.unwrap_or_else(|_| self.disconnected())),
            recv(self.closed) -> _ => Err(AudioError::Closed),
        }
    }

    /// Stop the stream. Blocked writers return [`AudioError::Closed`].
    pub fn close(&self) {
        let Some(close_tx) = self.close_tx.lock().take() else {
            return;
        };
        drop(close_tx);

        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
        tracing::debug!(
            "Playback on '{}' closed, {} underruns",
            self.device_name,
            self.underrun_count()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.close_tx.lock().is_none()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Output callbacks that ran out of queued audio
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn disconnected(&self) -> AudioError {
        if self.is_closed() {
            AudioError::Closed
        } else {
            AudioError::DeviceUnavailable(format!("playback stream on '{}' ended", self.device_name))
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Callback side of the chunk queue
struct ChunkSource {
    chunks: Receiver<Vec<i16>>,
    queue: VecDeque<i16>,
    underruns: Arc<AtomicU64>,
}

impl ChunkSource {
    /// Fill `data`, padding with silence when nothing is queued
    fn fill<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        let mut starved = false;
        for out in data.iter_mut() {
            if self.queue.is_empty() {
                match self.chunks.try_recv() {
                    Ok(chunk) => self.queue.extend(chunk),
                    Err(_) => starved = true,
                }
            }
            *out = self
                .queue
                .pop_front()
                .map(T::from_sample)
                .unwrap_or(T::EQUILIBRIUM);
        }
        if starved {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut source: ChunkSource,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| source.fill(data),
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

    #[test]
    fn test_chunk_source_fills_in_order() {
        let (tx, rx) = bounded::<Vec<i16>>(4);
        let mut source = ChunkSource {
            chunks: rx,
            queue: VecDeque::new(),
            underruns: Arc::new(AtomicU64::new(0)),
        };

        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4]).unwrap();

        let mut out = [0i16; 6];
        source.fill(&mut out);

        assert_eq!(out, [1, 2, 3, 4, 0, 0]);
        assert_eq!(source.underruns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_chunk_source_converts_to_float() {
        let (tx, rx) = bounded::<Vec<i16>>(1);
        let mut source = ChunkSource {
            chunks: rx,
            queue: VecDeque::new(),
            underruns: Arc::new(AtomicU64::new(0)),
        };

        tx.send(vec![0, i16::MIN]).unwrap();
        let mut out = [1.0f32; 2];
        source.fill(&mut out);

        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert_eq!(source.underruns.load(Ordering::Relaxed), 0);
    }
}
