//! Helpers shared by the loopback tests

use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::AudioFormat;

/// Small chunks keep the loopback tests fast
pub(crate) fn test_format() -> AudioFormat {
    AudioFormat::new(1, 8000, 64)
}

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A localhost port with nothing listening on it (at the time of the call)
pub(crate) fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A chunk whose bytes identify its position in a sequence
pub(crate) fn numbered_chunk(format: &AudioFormat, index: usize) -> Vec<u8> {
    (0..format.chunk_bytes())
        .map(|offset| (index * 31 + offset) as u8)
        .collect()
}
