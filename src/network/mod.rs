//! Network subsystem for raw PCM over TCP
//!
//! There is no framing on the wire: both ends agree on the chunk size out of
//! band and the stream is a plain concatenation of chunks.

pub mod endpoint;
pub mod listen;
pub mod share;
pub mod state;

pub use endpoint::Endpoint;
pub use listen::ListenChannel;
pub use share::ShareChannel;
pub use state::{ChannelState, ChannelStats, ChannelStatsSnapshot};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDevice, AudioFormat, MemoryDevice};
    use crate::shutdown::{ShutdownReason, ShutdownToken};
    use crate::test_support::wait_until;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Share on an ephemeral port, listen to it, push `chunks` through and
    /// return what came out the other end.
    fn loopback(format: AudioFormat, chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let shutdown = ShutdownToken::new();

        let (capture, feed, _unused_tap) = MemoryDevice::new(format);
        let capture: Arc<dyn AudioDevice> = Arc::new(capture);
        let share = Arc::new(ShareChannel::new(
            Endpoint::new("127.0.0.1", 0),
            capture.clone(),
            shutdown.clone(),
        ));
        let share_thread = {
            let share = share.clone();
            thread::spawn(move || share.run())
        };
        assert!(wait_until(Duration::from_secs(5), || share.local_addr().is_some()));
        let port = share.local_addr().unwrap().port();

        let (playback, _unused_feed, tap) = MemoryDevice::new(format);
        let playback: Arc<dyn AudioDevice> = Arc::new(playback);
        let listen = Arc::new(
            ListenChannel::new(Endpoint::new("127.0.0.1", port), playback.clone(), shutdown.clone())
                .with_retry_interval(Duration::from_millis(20)),
        );
        let listen_thread = {
            let listen = listen.clone();
            thread::spawn(move || listen.run())
        };
        assert!(wait_until(Duration::from_secs(5), || {
            share.state() == ChannelState::Streaming
        }));

        for chunk in chunks {
            feed.push(chunk.clone());
        }
        let received: Vec<Vec<u8>> = (0..chunks.len())
            .map_while(|_| tap.recv_timeout(Duration::from_secs(5)))
            .collect();

        shutdown.trigger(ShutdownReason::Requested);
        share.close();
        listen.close();
        capture.close();
        playback.close();
        assert!(share_thread.join().unwrap().is_ok());
        assert!(listen_thread.join().unwrap().is_ok());

        received
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_chunks_arrive_in_order_and_intact(
            chunk_frames in 1usize..256,
            seeds in proptest::collection::vec(any::<u8>(), 1..24),
        ) {
            let format = AudioFormat::new(1, 8000, chunk_frames);
            let chunks: Vec<Vec<u8>> = seeds
                .iter()
                .enumerate()
                .map(|(i, seed)| {
                    (0..format.chunk_bytes())
                        .map(|b| seed.wrapping_add((b * 7 + i) as u8))
                        .collect()
                })
                .collect();

            let received = loopback(format, &chunks);
            prop_assert_eq!(received, chunks);
        }
    }
}
