//! Streaming sink backed by a background transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::{ExportError, Result};
use crate::export::clock::Clock;
use crate::export::watchdog::Watchdog;
use crate::transport::{TransportEvent, TransportHandle, TransportMessage};

use super::{SinkKind, SinkSignal, StreamSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Aborted,
}

/// Sink that forwards every write to the transport consumer
///
/// The watchdog is armed when the consumer reports the download and pushed
/// forward on every pull request. Closing or aborting disarms it.
pub struct PipedSink {
    handle: TransportHandle,
    watchdog: Watchdog,
    clock: Arc<dyn Clock>,
    state: State,
    bytes_written: u64,
}

impl PipedSink {
    /// Announce a new download to the transport
    ///
    /// # Errors
    /// * `TransportError::Disconnected` - The consumer is not listening
    pub fn open(
        handle: TransportHandle,
        encoded_file_name: &str,
        stream_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        handle.post(TransportMessage::Start {
            encoded_file_name: encoded_file_name.to_string(),
        })?;
        debug!("Requested streamed download {}", encoded_file_name);

        Ok(Self {
            handle,
            watchdog: Watchdog::new(stream_timeout),
            clock,
            state: State::Open,
            bytes_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

#[async_trait]
impl StreamSink for PipedSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Piped
    }

    /// Queue `bytes` for the consumer
    ///
    /// The transport queue is unbounded. Only the reorder window bounds the
    /// rows held by the job; bytes already written wait in the queue until
    /// the consumer reads them, however slowly it pulls.
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != State::Open {
            return Err(ExportError::SinkClosed.into());
        }
        self.handle.post(TransportMessage::Chunk(bytes.to_vec()))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(ExportError::SinkClosed.into());
        }
        self.state = State::Closed;
        self.watchdog.disarm();
        self.handle.post(TransportMessage::End)?;
        debug!("Streamed download closed after {} bytes", self.bytes_written);
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        self.state = State::Aborted;
        self.watchdog.disarm();
        // The consumer may be the reason we abort
        if self.handle.post(TransportMessage::Cancel).is_err() {
            debug!("Transport already gone while aborting");
        }
        Ok(())
    }

    async fn next_signal(&mut self) -> SinkSignal {
        if self.state != State::Open {
            return std::future::pending().await;
        }

        loop {
            let event = tokio::select! {
                event = self.handle.next_event() => event,
                _ = self.watchdog.expired() => {
                    warn!(
                        "No pull request from the download consumer within {:?}",
                        self.watchdog.timeout()
                    );
                    self.watchdog.disarm();
                    return SinkSignal::Stalled;
                }
            };

            match event {
                Some(TransportEvent::Download { url_suffix }) => {
                    self.watchdog.reset(self.clock.now());
                    return SinkSignal::Ready {
                        download: Some(url_suffix),
                    };
                }
                Some(TransportEvent::Pulling) => {
                    trace!("Consumer pulling");
                    self.watchdog.reset(self.clock.now());
                }
                None => {
                    self.watchdog.disarm();
                    return SinkSignal::Disconnected;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::clock::SystemClock;
    use crate::transport::TransportEndpoint;
    use tokio::time::Instant;

    fn open_pair(timeout: Duration) -> (PipedSink, TransportEndpoint) {
        let (handle, endpoint) = TransportHandle::channel();
        let sink = PipedSink::open(handle, "t.csv", timeout, Arc::new(SystemClock)).unwrap();
        (sink, endpoint)
    }

    #[tokio::test]
    async fn test_posts_start_chunks_and_end() {
        let (mut sink, mut endpoint) = open_pair(Duration::from_secs(8));
        sink.write(b"a\n").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            endpoint.recv().await,
            Some(TransportMessage::Start {
                encoded_file_name: "t.csv".into()
            })
        );
        assert_eq!(
            endpoint.recv().await,
            Some(TransportMessage::Chunk(b"a\n".to_vec()))
        );
        assert_eq!(endpoint.recv().await, Some(TransportMessage::End));
        assert_eq!(sink.bytes_written(), 2);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut sink, _endpoint) = open_pair(Duration::from_secs(8));
        sink.close().await.unwrap();
        assert!(sink.write(b"x").await.is_err());
        assert!(sink.close().await.is_err());
        // abort after close is a no-op
        sink.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_posts_cancel_once() {
        let (mut sink, mut endpoint) = open_pair(Duration::from_secs(8));
        sink.abort().await.unwrap();
        sink.abort().await.unwrap();
        drop(sink);

        let mut messages = Vec::new();
        while let Some(message) = endpoint.recv().await {
            messages.push(message);
        }
        assert_eq!(messages.last(), Some(&TransportMessage::Cancel));
        assert_eq!(
            messages
                .iter()
                .filter(|m| **m == TransportMessage::Cancel)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_download_event_is_ready_and_arms_watchdog() {
        let (mut sink, endpoint) = open_pair(Duration::from_secs(8));
        assert!(!sink.watchdog().is_armed());
        endpoint.download_ready("abc/t.csv").unwrap();
        assert_eq!(
            sink.next_signal().await,
            SinkSignal::Ready {
                download: Some("abc/t.csv".into())
            }
        );
        assert!(sink.watchdog().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_disarms_watchdog() {
        let (mut sink, endpoint) = open_pair(Duration::from_secs(8));
        endpoint.download_ready("abc/t.csv").unwrap();
        sink.next_signal().await;
        assert!(sink.watchdog().is_armed());

        sink.write(b"a\n").await.unwrap();
        sink.close().await.unwrap();
        assert!(!sink.watchdog().is_armed());

        // no stall is reported once the download is complete
        let after_close = tokio::time::timeout(Duration::from_secs(20), sink.next_signal()).await;
        assert!(after_close.is_err());
        drop(endpoint);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalls_without_pull_requests() {
        let (mut sink, endpoint) = open_pair(Duration::from_secs(8));
        endpoint.download_ready("abc/t.csv").unwrap();
        sink.next_signal().await;

        let start = Instant::now();
        assert_eq!(sink.next_signal().await, SinkSignal::Stalled);
        assert!(Instant::now() - start >= Duration::from_secs(8));
        drop(endpoint);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_requests_keep_consumer_alive() {
        let (mut sink, endpoint) = open_pair(Duration::from_secs(8));
        endpoint.download_ready("abc/t.csv").unwrap();
        sink.next_signal().await;

        let keeper = tokio::spawn(async move {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_secs(5)).await;
                endpoint.pulling().unwrap();
            }
            endpoint
        });

        let start = Instant::now();
        assert_eq!(sink.next_signal().await, SinkSignal::Stalled);
        // last pull at 20s, deadline 8s later
        assert!(Instant::now() - start >= Duration::from_secs(28));
        drop(keeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_is_reported() {
        let (mut sink, endpoint) = open_pair(Duration::from_secs(8));
        drop(endpoint);
        assert_eq!(sink.next_signal().await, SinkSignal::Disconnected);
    }
}
