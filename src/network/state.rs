//! Channel state and counters

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a share or listen channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, not started
    Idle,
    /// Share side: binding, or bound and waiting for a peer
    Binding,
    /// Listen side: trying to reach the peer
    Connecting,
    /// Pumping chunks
    Streaming,
    /// Stopped for good
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Binding => "binding",
            ChannelState::Connecting => "connecting",
            ChannelState::Streaming => "streaming",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current state, readable from other threads
pub(crate) struct StateCell(Mutex<ChannelState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ChannelState::Idle))
    }

    pub(crate) fn get(&self) -> ChannelState {
        *self.0.lock()
    }

    /// Move to `next`. Closed is terminal.
    pub(crate) fn set(&self, next: ChannelState) {
        let mut state = self.0.lock();
        if *state != ChannelState::Closed {
            *state = next;
        }
    }
}

/// Per-channel counters
#[derive(Debug, Default)]
pub struct ChannelStats {
    bind_attempts: AtomicU64,
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    chunks: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub bind_attempts: u64,
    pub connect_attempts: u64,
    pub connections: u64,
    pub chunks: u64,
    pub bytes: u64,
}

impl ChannelStats {
    pub(crate) fn record_bind_attempt(&self) {
        self.bind_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, bytes: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            bind_attempts: self.bind_attempts.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Tracks whether the current run of failures has been logged
#[derive(Debug, Default)]
pub(crate) struct FailureEpisode {
    reported: bool,
}

impl FailureEpisode {
    /// `true` for the first failure of an episode
    pub(crate) fn report(&mut self) -> bool {
        !std::mem::replace(&mut self.reported, true)
    }

    /// Success ends the episode
    pub(crate) fn reset(&mut self) {
        self.reported = false;
    }
}
