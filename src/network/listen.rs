//! Client role: connect to a sharing peer and play what it sends

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioDevice;
use crate::constants::{CONNECT_RETRY_INTERVAL, CONNECT_TIMEOUT};
use crate::error::{Error, NetworkError, Result};
use crate::network::endpoint::Endpoint;
use crate::network::state::{
    ChannelState, ChannelStats, ChannelStatsSnapshot, FailureEpisode, StateCell,
};
use crate::shutdown::ShutdownToken;

/// Plays audio received from one remote share channel
pub struct ListenChannel {
    endpoint: Endpoint,
    device: Arc<dyn AudioDevice>,
    shutdown: ShutdownToken,
    state: StateCell,
    stats: ChannelStats,

    /// Clone of the connecting or connected socket so `close` can interrupt it
    socket: Mutex<Option<Socket>>,

    retry_interval: Duration,
    connect_timeout: Duration,
}

impl ListenChannel {
    pub fn new(endpoint: Endpoint, device: Arc<dyn AudioDevice>, shutdown: ShutdownToken) -> Self {
        Self {
            endpoint,
            device,
            shutdown,
            state: StateCell::new(),
            stats: ChannelStats::default(),
            socket: Mutex::new(None),
            retry_interval: CONNECT_RETRY_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the wait between failed connect attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Override the OS-level timeout of one connect attempt
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }

    /// Connect, play, reconnect until shutdown.
    ///
    /// Returns `Ok(())` when stopped and an error only for failures that must
    /// take the whole service down (the playback device).
    pub fn run(&self) -> Result<()> {
        let result = self.serve();
        self.state.set(ChannelState::Closed);
        self.socket.lock().take();
        tracing::info!("Listen on {} stopped", self.endpoint);
        result
    }

    /// Interrupt a connect attempt or a blocked receive. Safe from any thread, repeatable.
    pub fn close(&self) {
        if let Some(socket) = self.socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn serve(&self) -> Result<()> {
        let mut chunk = vec![0u8; self.device.format().chunk_bytes()];
        let mut failures = FailureEpisode::default();

        while !self.shutdown.is_triggered() {
            self.state.set(ChannelState::Connecting);

            let err = match self.connect() {
                Ok(stream) => {
                    let (err, played) = self.stream_from(stream, &mut chunk);
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    if played > 0 {
                        // Audio flowed: reconnect at once.
                        failures.reset();
                        tracing::warn!("Connection to {} closed: {}", self.endpoint, err);
                        continue;
                    }
                    // A peer that hangs up before sending a chunk is a failed attempt.
                    err
                }
                Err(e) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    e.into()
                }
            };

            self.state.set(ChannelState::Connecting);
            if failures.report() {
                tracing::warn!("{}, retrying every {:?}", err, self.retry_interval);
            } else {
                tracing::debug!("{}", err);
            }
            if self.shutdown.wait_timeout(self.retry_interval) {
                break;
            }
        }

        Ok(())
    }

    /// One connect attempt. The socket is registered before connecting so
    /// `close` can abort the attempt.
    fn connect(&self) -> std::result::Result<TcpStream, NetworkError> {
        self.stats.record_connect_attempt();
        let addr = self.endpoint.resolve()?;
        let failed = |source: io::Error| NetworkError::ConnectFailed {
            addr: addr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(failed)?;
        *self.socket.lock() = Some(socket.try_clone().map_err(failed)?);
        if self.shutdown.is_triggered() {
            return Err(failed(io::Error::new(io::ErrorKind::Interrupted, "stopped")));
        }

        match socket.connect_timeout(&SockAddr::from(addr), self.connect_timeout) {
            Ok(()) => Ok(socket.into()),
            Err(e) => {
                self.socket.lock().take();
                Err(failed(e))
            }
        }
    }

    /// Play from one connection. Returns the error that ended it and the
    /// number of chunks played.
    fn stream_from(&self, mut stream: TcpStream, chunk: &mut [u8]) -> (Error, u64) {
        let _ = stream.set_nodelay(true);
        if self.shutdown.is_triggered() {
            return (NetworkError::PeerClosed.into(), 0);
        }

        let peer = stream
            .peer_addr()
            .map(|addr: SocketAddr| addr.to_string())
            .unwrap_or_else(|_| self.endpoint.to_string());
        self.state.set(ChannelState::Streaming);
        self.stats.record_connection();
        tracing::info!("Connected to {}", peer);

        let before = self.stats.snapshot().chunks;
        let err = self.pump(&mut stream, chunk);
        let played = self.stats.snapshot().chunks - before;

        self.socket.lock().take();
        tracing::debug!("Played {} chunks from {}", played, peer);
        (err, played)
    }

    /// Receive exactly one chunk, play it, repeat. A zero-length read
    /// mid-chunk is an orderly close.
    fn pump(&self, stream: &mut TcpStream, chunk: &mut [u8]) -> Error {
        loop {
            if let Err(e) = stream.read_exact(chunk) {
                return NetworkError::from_stream(e).into();
            }
            if let Err(e) = self.device.write_chunk(chunk) {
                return e.into();
            }
            self.stats.record_chunk(chunk.len());
        }
    }
}
