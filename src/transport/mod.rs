//! Background download transport
//!
//! A transport is a background consumer that turns a sequence of posted
//! byte chunks into a user-visible download. The export job talks to it
//! through a [`TransportHandle`]:
//!
//! - the job posts [`TransportMessage::Start`] with the encoded file name,
//!   then `Chunk`s, then `End` (or `Cancel` to abort);
//! - the consumer answers with [`TransportEvent::Download`] once the
//!   download exists, and sends [`TransportEvent::Pulling`] whenever it is
//!   ready for more data.
//!
//! Looking up a transport is a capability check: platforms without one
//! return [`TransportError::Unavailable`] and the job buffers in memory
//! instead.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

pub mod file;

pub use file::FileTransport;

/// Message posted by the export job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Open a download under the given percent-encoded file name
    Start { encoded_file_name: String },
    /// Bytes to append to the download
    Chunk(Vec<u8>),
    /// Graceful end of the download
    End,
    /// Abort the download
    Cancel,
}

/// Event emitted by the transport consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The download is available under this location suffix
    Download { url_suffix: String },
    /// The consumer wants more data
    Pulling,
}

/// Job side of a transport connection
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<TransportMessage>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Consumer side of a transport connection
#[derive(Debug)]
pub struct TransportEndpoint {
    inbound: mpsc::UnboundedReceiver<TransportMessage>,
    outbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandle {
    /// Create a connected handle/endpoint pair
    ///
    /// Both directions are unbounded: posting never waits for the consumer.
    pub fn channel() -> (TransportHandle, TransportEndpoint) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            TransportHandle {
                outbound: message_tx,
                inbound: event_rx,
            },
            TransportEndpoint {
                inbound: message_rx,
                outbound: event_tx,
            },
        )
    }

    /// Post a message to the consumer
    ///
    /// # Errors
    /// * `TransportError::Disconnected` - The consumer has gone away
    pub fn post(&self, message: TransportMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Disconnected.into())
    }

    /// Wait for the next consumer event; `None` once the consumer is gone
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl TransportEndpoint {
    /// Wait for the next posted message; `None` once the job dropped its handle
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.inbound.recv().await
    }

    pub fn download_ready(&self, url_suffix: impl Into<String>) -> Result<()> {
        self.emit(TransportEvent::Download {
            url_suffix: url_suffix.into(),
        })
    }

    pub fn pulling(&self) -> Result<()> {
        self.emit(TransportEvent::Pulling)
    }

    fn emit(&self, event: TransportEvent) -> Result<()> {
        self.outbound
            .send(event)
            .map_err(|e| TransportError::SendFailed(format!("{:?}", e.0)).into())
    }
}

/// Capability lookup for a streaming transport
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Connect to the transport
    ///
    /// # Errors
    /// * `TransportError::Unavailable` - No streaming transport on this platform
    async fn transport_handle(&self) -> Result<TransportHandle>;
}

/// Provider for platforms without a streaming transport
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

#[async_trait]
impl TransportProvider for NoTransport {
    async fn transport_handle(&self) -> Result<TransportHandle> {
        Err(TransportError::Unavailable("download transport not provided".to_string()).into())
    }
}

/// Make a file name safe for a download header
///
/// Path separators become `:` and everything outside the unreserved set is
/// percent-encoded, which also covers `'`, `(`, `)` and `*`.
pub fn encode_file_name(file_name: &str) -> String {
    urlencoding::encode(&file_name.replace('/', ":")).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("table.csv"), "table.csv");
        assert_eq!(encode_file_name("a b.csv"), "a%20b.csv");
        assert_eq!(encode_file_name("dir/x.csv"), "dir%3Ax.csv");
        assert_eq!(encode_file_name("it's (1)*.csv"), "it%27s%20%281%29%2A.csv");
    }

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (mut handle, mut endpoint) = TransportHandle::channel();

        handle.post(TransportMessage::Chunk(b"abc".to_vec())).unwrap();
        assert_eq!(
            endpoint.recv().await,
            Some(TransportMessage::Chunk(b"abc".to_vec()))
        );

        endpoint.pulling().unwrap();
        assert_eq!(handle.next_event().await, Some(TransportEvent::Pulling));

        drop(endpoint);
        assert!(!handle.is_connected());
        assert!(handle.post(TransportMessage::End).is_err());
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_no_transport_is_unavailable() {
        let err = NoTransport.transport_handle().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::TableSaverError::Transport(TransportError::Unavailable(_))
        ));
    }
}
