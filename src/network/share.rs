//! Server role: stream captured audio to whoever connects
//!
//! The listening socket is bound once and kept for the life of the channel.
//! Peers are served one at a time; when a peer goes away the channel goes
//! back to `accept`.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioDevice;
use crate::constants::{BIND_RETRY_INTERVAL, CONNECT_RETRY_INTERVAL};
use crate::error::{Error, NetworkError, Result};
use crate::network::endpoint::{reachable, Endpoint};
use crate::network::state::{
    ChannelState, ChannelStats, ChannelStatsSnapshot, FailureEpisode, StateCell,
};
use crate::shutdown::ShutdownToken;

/// How long `close` waits on the connection that wakes a blocked `accept`
const WAKE_TIMEOUT: Duration = Duration::from_millis(200);

/// Sends captured audio to one connected peer at a time
pub struct ShareChannel {
    endpoint: Endpoint,
    device: Arc<dyn AudioDevice>,
    shutdown: ShutdownToken,
    state: StateCell,
    stats: ChannelStats,

    /// Clones of the live sockets, kept so `close` can interrupt blocking calls
    listener: Mutex<Option<TcpListener>>,
    peer: Mutex<Option<TcpStream>>,
    local_addr: Mutex<Option<SocketAddr>>,

    bind_retry: Duration,
    accept_retry: Duration,
}

impl ShareChannel {
    pub fn new(endpoint: Endpoint, device: Arc<dyn AudioDevice>, shutdown: ShutdownToken) -> Self {
        Self {
            endpoint,
            device,
            shutdown,
            state: StateCell::new(),
            stats: ChannelStats::default(),
            listener: Mutex::new(None),
            peer: Mutex::new(None),
            local_addr: Mutex::new(None),
            bind_retry: BIND_RETRY_INTERVAL,
            accept_retry: CONNECT_RETRY_INTERVAL,
        }
    }

    /// Override the wait between bind attempts
    pub fn with_bind_retry(mut self, interval: Duration) -> Self {
        self.bind_retry = interval;
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }

    /// Address the listening socket is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Serve peers until shutdown.
    ///
    /// Returns `Ok(())` when stopped and an error only for failures that must
    /// take the whole service down (the capture device).
    pub fn run(&self) -> Result<()> {
        let result = self.serve();
        self.state.set(ChannelState::Closed);
        self.listener.lock().take();
        self.peer.lock().take();
        tracing::info!("Share on {} stopped", self.endpoint);
        result
    }

    /// Interrupt any blocking accept or send. Safe from any thread, repeatable.
    pub fn close(&self) {
        if let Some(peer) = self.peer.lock().take() {
            let _ = peer.shutdown(Shutdown::Both);
        }

        if let Some(listener) = self.listener.lock().take() {
            let _ = SockRef::from(&listener).shutdown(Shutdown::Both);
            // accept() ignores shutdown on some platforms; a throwaway connection wakes it.
            if let Ok(addr) = listener.local_addr() {
                let _ = TcpStream::connect_timeout(&reachable(addr), WAKE_TIMEOUT);
            }
        }
    }

    fn serve(&self) -> Result<()> {
        let Some(listener) = self.bind() else {
            return Ok(());
        };

        let mut chunk = vec![0u8; self.device.format().chunk_bytes()];
        let mut accept_failures = FailureEpisode::default();

        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    accept_failures.reset();

                    let err = self.stream_to(stream, peer_addr, &mut chunk);
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    tracing::warn!("Connection from {} closed: {}", peer_addr, err);
                }
                Err(e) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    if accept_failures.report() {
                        tracing::warn!("Accept on {} failed: {}", self.endpoint, e);
                    } else {
                        tracing::debug!("Accept on {} failed again: {}", self.endpoint, e);
                    }
                    if self.shutdown.wait_timeout(self.accept_retry) {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Bind and listen, retrying until it works. `None` means shutdown.
    fn bind(&self) -> Option<TcpListener> {
        self.state.set(ChannelState::Binding);
        let mut failures = FailureEpisode::default();

        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            self.stats.record_bind_attempt();

            match self.try_bind() {
                Ok(listener) => {
                    let local = listener.local_addr().ok();
                    *self.listener.lock() = listener.try_clone().ok();
                    *self.local_addr.lock() = local;

                    // A stop that raced the registration above would have missed this socket.
                    if self.shutdown.is_triggered() {
                        return None;
                    }

                    match local {
                        Some(addr) => tracing::info!("Listening on {}", addr),
                        None => tracing::info!("Listening on {}", self.endpoint),
                    }
                    return Some(listener);
                }
                Err(e) => {
                    if failures.report() {
                        tracing::warn!("{}, retrying every {:?}", e, self.bind_retry);
                    } else {
                        tracing::debug!("{}", e);
                    }
                    if self.shutdown.wait_timeout(self.bind_retry) {
                        return None;
                    }
                }
            }
        }
    }

    fn try_bind(&self) -> std::result::Result<TcpListener, NetworkError> {
        let addr = self.endpoint.resolve()?;
        bind_listener(addr).map_err(|source| NetworkError::BindConflict {
            addr: addr.to_string(),
            source,
        })
    }

    /// Serve one peer. Returns the error that ended the connection.
    fn stream_to(&self, mut stream: TcpStream, peer_addr: SocketAddr, chunk: &mut [u8]) -> Error {
        let _ = stream.set_nodelay(true);
        *self.peer.lock() = stream.try_clone().ok();
        if self.shutdown.is_triggered() {
            return NetworkError::PeerClosed.into();
        }

        self.state.set(ChannelState::Streaming);
        self.stats.record_connection();
        tracing::info!("Connection from {}", peer_addr);

        let before = self.stats.snapshot().chunks;
        let err = self.pump(&mut stream, chunk);
        let sent = self.stats.snapshot().chunks - before;

        self.peer.lock().take();
        self.state.set(ChannelState::Binding);
        tracing::debug!("Sent {} chunks to {}", sent, peer_addr);
        err
    }

    /// Capture a chunk, send it, repeat. Chunk N+1 is not captured before
    /// chunk N is fully written.
    fn pump(&self, stream: &mut TcpStream, chunk: &mut [u8]) -> Error {
        loop {
            if let Err(e) = self.device.read_chunk(chunk) {
                return e.into();
            }
            if let Err(e) = stream.write_all(chunk) {
                return NetworkError::from_stream(e).into();
            }
            self.stats.record_chunk(chunk.len());
        }
    }
}

/// Listening socket with a backlog of one
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    // On Windows this would let a second process steal the port.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket.into())
}
