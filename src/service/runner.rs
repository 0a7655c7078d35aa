//! Runs the channels of one configured service
//!
//! The runner owns the audio device and both channels. Channel threads never
//! close anything themselves: a fatal error is handed to [`ServiceRunner::stop_all`],
//! which triggers the shared token and closes every socket and stream this
//! runner owns.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioDevice, AudioFormat, DeviceCatalog, Direction, DuplexDevice};
use crate::config::ServiceEntry;
use crate::constants::{BIND_RETRY_INTERVAL, CONNECT_RETRY_INTERVAL, START_STAGGER};
use crate::error::{Error, Result};
use crate::network::{ListenChannel, ShareChannel};
use crate::shutdown::{ShutdownReason, ShutdownToken};

/// Timing knobs for a runner
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Pause before starting each channel
    pub stagger: Duration,
    pub bind_retry: Duration,
    pub connect_retry: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            stagger: START_STAGGER,
            bind_retry: BIND_RETRY_INTERVAL,
            connect_retry: CONNECT_RETRY_INTERVAL,
        }
    }
}

struct RunnerInner {
    label: String,
    device: Arc<dyn AudioDevice>,
    share: Option<Arc<ShareChannel>>,
    listen: Option<Arc<ListenChannel>>,
    shutdown: ShutdownToken,
    released: AtomicBool,
}

impl RunnerInner {
    fn stop_all(&self, reason: ShutdownReason) -> bool {
        let first = self.shutdown.request(reason);
        self.release();
        first
    }

    /// Close sockets first so channel threads stop pulling from the device.
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Releasing service {}", self.label);

        if let Some(share) = &self.share {
            share.close();
        }
        if let Some(listen) = &self.listen {
            listen.close();
        }
        self.device.close();
    }
}

/// One service entry brought to life
pub struct ServiceRunner {
    inner: Arc<RunnerInner>,
    stagger: Duration,
    threads: Vec<JoinHandle<()>>,
}

impl ServiceRunner {
    /// Build a runner over an already opened device
    pub fn new(
        entry: &ServiceEntry,
        device: Arc<dyn AudioDevice>,
        shutdown: ShutdownToken,
        options: RunnerOptions,
    ) -> Self {
        let share = entry.share.then(|| {
            Arc::new(
                ShareChannel::new(entry.share_endpoint(), device.clone(), shutdown.clone())
                    .with_bind_retry(options.bind_retry),
            )
        });
        let listen = entry.listen.then(|| {
            Arc::new(
                ListenChannel::new(entry.listen_endpoint(), device.clone(), shutdown.clone())
                    .with_retry_interval(options.connect_retry),
            )
        });

        Self {
            inner: Arc::new(RunnerInner {
                label: entry.label(),
                device,
                share,
                listen,
                shutdown,
                released: AtomicBool::new(false),
            }),
            stagger: options.stagger,
            threads: Vec::new(),
        }
    }

    /// Open the hardware streams the entry needs and build a runner on them
    pub fn open(
        entry: &ServiceEntry,
        format: AudioFormat,
        catalog: &DeviceCatalog,
        shutdown: ShutdownToken,
        options: RunnerOptions,
    ) -> Result<Self> {
        let input = entry
            .share
            .then(|| catalog.select(entry.input_device_name.as_deref(), Direction::Input))
            .transpose()?;
        let output = entry
            .listen
            .then(|| catalog.select(entry.output_device_name.as_deref(), Direction::Output))
            .transpose()?;

        if let Some(handle) = &input {
            tracing::info!("Capturing from {} ({})", handle.name(), format);
        }
        if let Some(handle) = &output {
            tracing::info!("Playing to {} ({})", handle.name(), format);
        }

        let device = DuplexDevice::open(format, input, output)?;
        Ok(Self::new(entry, Arc::new(device), shutdown, options))
    }

    /// Start the enabled channels, each on its own thread.
    ///
    /// Returns early without error if shutdown arrives during the stagger.
    pub fn start(&mut self) -> Result<()> {
        if let Some(share) = self.inner.share.clone() {
            if self.inner.shutdown.wait_timeout(self.stagger) {
                return Ok(());
            }
            let handle = self.spawn_channel("share", move || share.run())?;
            self.threads.push(handle);
        }

        if let Some(listen) = self.inner.listen.clone() {
            if self.inner.shutdown.wait_timeout(self.stagger) {
                return Ok(());
            }
            let handle = self.spawn_channel("listen", move || listen.run())?;
            self.threads.push(handle);
        }

        Ok(())
    }

    fn spawn_channel<F>(&self, role: &'static str, run: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(format!("audio-{}", role))
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(run)) {
                    Ok(result) => result,
                    Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref()))),
                };
                if let Err(e) = outcome {
                    inner.stop_all(ShutdownReason::Failure(format!(
                        "{} on audio {} thread",
                        e, role
                    )));
                }
            })?;
        Ok(handle)
    }

    /// Trigger shutdown and release this runner's sockets and device.
    ///
    /// Returns `true` only for the call that actually triggered the token.
    pub fn stop_all(&self, reason: ShutdownReason) -> bool {
        self.inner.stop_all(reason)
    }

    /// Block until the token fires, from any source, then release resources.
    pub fn wait(&self) -> ShutdownReason {
        let reason = self.inner.shutdown.wait();
        self.inner.release();
        reason
    }

    /// Join the channel threads. Call after shutdown.
    pub fn join(mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Channel thread of {} panicked while exiting", self.inner.label);
            }
        }
    }

    pub fn share(&self) -> Option<&ShareChannel> {
        self.inner.share.as_deref()
    }

    pub fn listen(&self) -> Option<&ListenChannel> {
        self.inner.listen.as_deref()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, MemoryDevice, MemoryFeed, MemoryTap};
    use crate::error::AudioError;
    use crate::network::ChannelState;
    use crate::test_support::{free_port, test_format, wait_until};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn fast_options() -> RunnerOptions {
        RunnerOptions {
            stagger: Duration::ZERO,
            bind_retry: Duration::from_millis(50),
            connect_retry: Duration::from_millis(50),
        }
    }

    fn memory_runner(
        entry: &ServiceEntry,
        format: AudioFormat,
        shutdown: ShutdownToken,
    ) -> (ServiceRunner, MemoryFeed, MemoryTap) {
        let (device, feed, tap) = MemoryDevice::new(format);
        let runner = ServiceRunner::new(entry, Arc::new(device), shutdown, fast_options());
        (runner, feed, tap)
    }

    fn share_entry(port: u16) -> ServiceEntry {
        ServiceEntry {
            host: "127.0.0.1".to_string(),
            port,
            share: true,
            listen: false,
            ..ServiceEntry::default()
        }
    }

    fn listen_entry(port: u16) -> ServiceEntry {
        ServiceEntry {
            connect: "127.0.0.1".to_string(),
            port,
            share: false,
            listen: true,
            ..ServiceEntry::default()
        }
    }

    #[test]
    fn test_silent_chunk_end_to_end() {
        let format = AudioFormat::default();
        let port = free_port();

        let a_shutdown = ShutdownToken::new();
        let (mut a, a_feed, _a_tap) = memory_runner(&share_entry(port), format, a_shutdown.clone());
        let b_shutdown = ShutdownToken::new();
        let (mut b, _b_feed, b_tap) = memory_runner(&listen_entry(port), format, b_shutdown.clone());
        assert!(a.listen().is_none());
        assert!(b.share().is_none());

        a.start().unwrap();
        b.start().unwrap();

        let share = a.share().unwrap();
        assert!(wait_until(Duration::from_secs(5), || share.state() == ChannelState::Streaming));

        a_feed.push_silence(1);
        let chunk = b_tap.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.len(), 6144);
        assert!(chunk.iter().all(|&b| b == 0));

        assert!(a.stop_all(ShutdownReason::Requested));
        assert!(b.stop_all(ShutdownReason::Signal("SIGINT".to_string())));
        assert_eq!(b_shutdown.reason(), Some(ShutdownReason::Signal("SIGINT".to_string())));
        a.join();
        b.join();
    }

    #[test]
    fn test_concurrent_stop_all_triggers_once() {
        let shutdown = ShutdownToken::new();
        let (mut runner, _feed, _tap) =
            memory_runner(&share_entry(0), test_format(), shutdown.clone());
        runner.start().unwrap();

        let runner = Arc::new(runner);
        let winners = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let runner = runner.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if runner.stop_all(ShutdownReason::Failure(format!("stopper {}", i))) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(!runner.stop_all(ShutdownReason::Requested));
        assert!(shutdown.reason().unwrap().is_failure());

        let share = runner.share().unwrap();
        assert!(wait_until(Duration::from_secs(5), || share.state() == ChannelState::Closed));
        if let Ok(runner) = Arc::try_unwrap(runner) {
            runner.join();
        }
    }

    #[test]
    fn test_device_failure_stops_every_channel() {
        let format = test_format();
        let shutdown = ShutdownToken::new();
        let entry = ServiceEntry {
            host: "127.0.0.1".to_string(),
            connect: "127.0.0.1".to_string(),
            port: free_port(),
            ..ServiceEntry::default()
        };
        let (mut runner, feed, _tap) = memory_runner(&entry, format, shutdown.clone());
        runner.start().unwrap();

        // Listen connects to our own share; losing the capture side is fatal.
        let share = runner.share().unwrap();
        assert!(wait_until(Duration::from_secs(5), || share.state() == ChannelState::Streaming));
        drop(feed);

        let reason = shutdown.wait();
        match &reason {
            ShutdownReason::Failure(message) => {
                assert!(message.ends_with("on audio share thread"), "{}", message);
            }
            other => panic!("unexpected reason {:?}", other),
        }

        let listen = runner.listen().unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            share.state() == ChannelState::Closed && listen.state() == ChannelState::Closed
        }));
        runner.join();
    }

    #[test]
    fn test_wait_releases_on_external_trigger() {
        let shared = ShutdownToken::new();
        let (mut runner, _feed, _tap) =
            memory_runner(&listen_entry(free_port()), test_format(), shared.clone());
        runner.start().unwrap();

        let listen = runner.listen().unwrap();
        assert!(wait_until(Duration::from_secs(5), || listen.stats().connect_attempts >= 1));

        // Another runner on the same token hits a failure.
        let other = shared.clone();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            other.trigger(ShutdownReason::Failure("neighbour".to_string()))
        });

        let reason = runner.wait();
        assert_eq!(reason, ShutdownReason::Failure("neighbour".to_string()));
        assert!(trigger.join().unwrap());
        assert!(wait_until(Duration::from_secs(5), || listen.state() == ChannelState::Closed));
        runner.join();
    }

    #[test]
    fn test_stagger_is_interrupted_by_stop() {
        let shutdown = ShutdownToken::new();
        let (device, _feed, _tap) = MemoryDevice::new(test_format());
        let options = RunnerOptions {
            stagger: Duration::from_secs(30),
            ..fast_options()
        };
        let mut runner = ServiceRunner::new(&share_entry(0), Arc::new(device), shutdown.clone(), options);

        let stopper = shutdown.clone();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.trigger(ShutdownReason::Requested)
        });

        let started = Instant::now();
        runner.start().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(trigger.join().unwrap());
        assert_eq!(runner.share().unwrap().state(), ChannelState::Idle);
        runner.join();
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_closed_device_error_is_reported() {
        let error: Error = AudioError::Closed.into();
        let reason = ShutdownReason::Failure(format!("{} on audio listen thread", error));
        assert_eq!(
            reason.to_string(),
            "crashed: Audio error: Device closed on audio listen thread"
        );
    }
}
