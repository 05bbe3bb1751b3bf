//! Reply channel for handlers.
//!
//! Every dispatched call gets a [`ReplyChannel`] bound to its call id and to
//! the write side of the client connection. The server does not impose a
//! reply format: handlers write whatever bytes the peer expects, optionally
//! using [`ReplyChannel::id`] to correlate the reply.
//!
//! # Example
//!
//! ```ignore
//! async fn ping(_payload: rmpv::Value, reply: ReplyChannel) -> HandlerResult {
//!     reply.write(b"pong").await?;
//!     Ok(())
//! }
//! ```

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::codec::MsgPackCodec;
use crate::error::{Result, ServerError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of the client connection, shared by all reply channels.
///
/// Once [`close`](Self::close) has run, every write fails with
/// [`ServerError::ConnectionClosed`].
pub struct ConnectionWriter {
    inner: Mutex<Option<BoxedWriter>>,
}

impl ConnectionWriter {
    /// Wrap the write half of a connection.
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            inner: Mutex::new(Some(Box::new(writer))),
        })
    }

    /// Perform a single write.
    ///
    /// Succeeds if at least one byte was written; a short write is not an
    /// error and the count is returned.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;

        let written = writer.write(data).await?;
        if written == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        writer.flush().await?;

        Ok(written)
    }

    /// Write the whole buffer.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;

        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down and drop the writer.
    pub async fn close(&self) {
        let writer = self.inner.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("shutdown() on client connection failed: {}", e);
            }
        }
    }

    /// Whether the connection has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

/// Per-call handle for writing a reply to the peer.
///
/// Cheap to clone. Valid only while the connection is open.
#[derive(Clone)]
pub struct ReplyChannel {
    /// Call id from the request envelope.
    call_id: u32,
    /// Shared write side of the connection.
    conn: Arc<ConnectionWriter>,
}

impl ReplyChannel {
    /// Create a reply channel for one call.
    pub fn new(call_id: u32, conn: Arc<ConnectionWriter>) -> Self {
        Self { call_id, conn }
    }

    /// Get the call id this channel answers.
    #[inline]
    pub fn id(&self) -> u32 {
        self.call_id
    }

    /// Write raw bytes with a single write call.
    ///
    /// Returns the number of bytes written, which may be less than
    /// `data.len()` for large payloads. Use [`write_all`](Self::write_all)
    /// when the whole buffer must go out.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.conn.write(data).await
    }

    /// Write the whole buffer.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        self.conn.write_all(data).await
    }

    /// Encode a value with MsgPack and write it whole.
    pub async fn respond<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let data = MsgPackCodec::encode(value)?;
        self.conn.write_all(&data).await
    }
}

impl std::fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}
