//! Process-wide stop signal
//!
//! A [`ShutdownToken`] is cloned into every channel and runner. Triggering it
//! is the only thing a signal handler does; whoever owns sockets and devices
//! reacts by closing them, which is what actually unblocks the channel threads.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the process is going down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Stopped by the embedding code
    Requested,
    /// Stopped by a process signal (named)
    Signal(String),
    /// A channel hit an unrecoverable error
    Failure(String),
}

impl ShutdownReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::Failure(_))
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => write!(f, "closing process"),
            ShutdownReason::Signal(name) => write!(f, "killing process with signal {}", name),
            ShutdownReason::Failure(message) => write!(f, "crashed: {}", message),
        }
    }
}

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
    changed: Condvar,
}

/// Cloneable handle to a shared stop flag
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let mut slot = self.inner.reason.lock();
        if self.inner.stopped.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(reason);
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.changed.notify_all();
        true
    }

    /// Trigger and log the reason, once: failures at error level, anything else at info.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let first = self.trigger(reason.clone());
        if first {
            if reason.is_failure() {
                tracing::error!("{}", reason);
            } else {
                tracing::info!("{}", reason);
            }
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Reason recorded by the first trigger
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.lock().clone()
    }

    /// Sleep for at most `timeout`, waking early on shutdown.
    ///
    /// Returns `true` if shutdown has been requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.reason.lock();
        while slot.is_none() {
            if self.inner.changed.wait_until(&mut slot, deadline).timed_out() {
                return slot.is_some();
            }
        }
        true
    }

    /// Block until shutdown is requested.
    pub fn wait(&self) -> ShutdownReason {
        let mut slot = self.inner.reason.lock();
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            self.inner.changed.wait(&mut slot);
        }
    }
}

impl fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_first_trigger_wins() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());

        assert!(token.trigger(ShutdownReason::Signal("SIGINT".into())));
        assert!(!token.trigger(ShutdownReason::Requested));

        assert!(token.is_triggered());
        assert_eq!(token.reason(), Some(ShutdownReason::Signal("SIGINT".into())));
    }

    #[test]
    fn test_concurrent_trigger() {
        let token = ShutdownToken::new();
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let token = token.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if token.trigger(ShutdownReason::Failure(format!("thread {}", i))) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_timeout_wakes_early() {
        let token = ShutdownToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));

        let trigger = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger(ShutdownReason::Requested);
        });

        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(token.wait(), ShutdownReason::Requested);
        handle.join().unwrap();
    }

    #[test]
    fn test_request_reports_only_the_first_reason() {
        let token = ShutdownToken::new();
        assert!(token.request(ShutdownReason::Signal("SIGINT".into())));
        assert!(!token.request(ShutdownReason::Failure("late".into())));
        assert!(!token.trigger(ShutdownReason::Requested));
        assert_eq!(token.reason(), Some(ShutdownReason::Signal("SIGINT".into())));
        assert!(token.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            ShutdownReason::Signal("SIGABRT".into()).to_string(),
            "killing process with signal SIGABRT"
        );
        assert!(ShutdownReason::Failure("x".into()).is_failure());
        assert!(!ShutdownReason::Requested.is_failure());
    }
}
