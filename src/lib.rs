//! # Audio Link
//!
//! Forwards live raw PCM audio between two machines over TCP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐                ┌──────────────────────────────┐
//! │           MACHINE A          │                │           MACHINE B          │
//! │                              │                │                              │
//! │  ┌────────────┐              │                │              ┌────────────┐  │
//! │  │ Microphone │              │                │              │  Speakers  │  │
//! │  └─────┬──────┘              │                │              └─────▲──────┘  │
//! │        │ read_chunk          │                │         write_chunk│         │
//! │        ▼                     │   TCP, raw     │                    │         │
//! │  ┌────────────┐  accept      │   s16le PCM    │   connect   ┌──────┴─────┐   │
//! │  │ShareChannel│──────────────┼───────────────►┼─────────────│ListenChannel│  │
//! │  └────────────┘              │                │             └────────────┘   │
//! │                              │                │                              │
//! │  ┌─────────────┐  connect    │                │    accept   ┌────────────┐   │
//! │  │ListenChannel│◄────────────┼◄───────────────┼─────────────│ShareChannel│   │
//! │  └──────┬──────┘             │                │             └──────▲─────┘   │
//! │         ▼                    │                │                    │         │
//! │  ┌────────────┐              │                │              ┌─────┴──────┐  │
//! │  │  Speakers  │              │                │              │ Microphone │  │
//! │  └────────────┘              │                │              └────────────┘  │
//! └──────────────────────────────┘                └──────────────────────────────┘
//! ```
//!
//! Each configured service owns one [`service::ServiceRunner`], which owns one
//! audio device and up to one channel of each direction. Channels run on their
//! own threads and share nothing but a [`shutdown::ShutdownToken`].

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod service;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate of the PCM stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 96_000;

    /// Channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Frames per chunk, the unit of every device and socket transfer
    pub const DEFAULT_CHUNK_FRAMES: usize = 3072;

    /// Bytes per sample (signed 16-bit)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Default TCP port for both share and listen
    pub const DEFAULT_PORT: u16 = 452;

    /// Default bind and connect address
    pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

    /// Default configuration file
    pub const DEFAULT_CONFIG_PATH: &str = "audio_config.json";

    /// Wait between bind attempts while the port is taken
    pub const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(5);

    /// Wait between connect attempts
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

    /// OS-level timeout for a single connect attempt
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Delay before starting each channel of a service
    pub const START_STAGGER: Duration = Duration::from_millis(1500);

    /// Captured callback blocks held before the oldest is dropped
    pub const CAPTURE_QUEUE_BLOCKS: usize = 64;

    /// Chunks queued for playback before `write_chunk` blocks
    pub const PLAYBACK_QUEUE_CHUNKS: usize = 4;
}
