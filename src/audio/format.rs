//! PCM stream format and sample packing
//!
//! Samples travel as signed 16-bit little-endian integers, interleaved when
//! there is more than one channel. Every device and socket transfer moves
//! exactly one chunk.

use std::fmt;
use std::time::Duration;

use crate::constants::{
    BYTES_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_CHUNK_FRAMES, DEFAULT_SAMPLE_RATE,
};

/// Fixed stream parameters shared by both ends of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub chunk_frames: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl AudioFormat {
    pub fn new(channels: u16, sample_rate: u32, chunk_frames: usize) -> Self {
        Self {
            channels,
            sample_rate,
            chunk_frames,
        }
    }

    /// Interleaved samples in one chunk
    pub fn chunk_samples(&self) -> usize {
        self.chunk_frames * self.channels as usize
    }

    /// Bytes in one chunk on the wire
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * BYTES_PER_SAMPLE
    }

    /// Playback time covered by one chunk
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_micros(self.chunk_frames as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch {}Hz s16le x{}",
            self.channels, self.sample_rate, self.chunk_frames
        )
    }
}

/// Pack samples into little-endian bytes. `out` must hold `2 * samples.len()` bytes.
pub fn encode_samples(samples: &[i16], out: &mut [u8]) {
    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(BYTES_PER_SAMPLE)) {
        bytes.copy_from_slice(&sample.to_le_bytes());
    }
}

/// Unpack little-endian bytes into samples. A trailing odd byte is ignored.
pub fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
