//! Outbound side of the byte transport.
//!
//! Framing is the transport's business: a sink receives one complete encoded
//! envelope per `send` and must deliver it as one message.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::error::TransportError;
use crate::message::Envelope;

/// Destination for outbound messages
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one encoded message.
    async fn send(&self, message: Vec<u8>) -> Result<(), TransportError>;
}

/// Type alias for a shared sink
pub type SharedSink = Arc<dyn MessageSink>;

/// Encode and send an envelope
pub async fn send_envelope(sink: &dyn MessageSink, envelope: &Envelope) -> Result<(), TransportError> {
    let bytes = envelope.encode()?;
    sink.send(bytes).await
}

/// Sink over any async writer.
///
/// All writes go through one lock, so messages from concurrent callers and
/// handlers never interleave on the wire.
pub struct WriterSink<W> {
    writer: Mutex<W>,
    delimiter: Option<Vec<u8>>,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            delimiter: None,
        }
    }

    /// Append `delimiter` after every message (e.g. `b"\n"` for line framing).
    pub fn with_delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> MessageSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: Vec<u8>) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        trace!(bytes = message.len(), "writing message");
        writer.write_all(&message).await?;
        if let Some(ref delimiter) = self.delimiter {
            writer.write_all(delimiter).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Queue-backed sink: a dedicated writer task owns the receiving end.
#[async_trait]
impl MessageSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn send(&self, message: Vec<u8>) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| TransportError::Closed)
    }
}
