//! Native Messaging framing over a pair of byte streams.
//!
//! Every message is a `u32` length in native byte order followed by that many
//! bytes of UTF-8 JSON. The browser launches the host with the streams wired
//! to stdin/stdout, but the channel itself is generic so tests can drive it
//! over in-memory buffers.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// A decoded inbound message: always a JSON object.
pub type Message = Map<String, Value>;

/// The browser refuses extension -> host messages larger than this.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Unrecoverable framing failures. Once one of these is returned the stream
/// position is unknown and the channel must be abandoned.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("stream closed after {0} of 4 length-prefix bytes")]
    TruncatedHeader(usize),

    #[error("stream closed after {read} of {expected} payload bytes")]
    TruncatedBody { read: usize, expected: usize },

    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("message payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("message payload is not a JSON object: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("failed to encode outgoing message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-prefixed JSON channel.
pub struct FramedChannel<R, W> {
    reader: R,
    writer: W,
    max_message_bytes: usize,
}

impl<R, W> FramedChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_limit(reader, writer, DEFAULT_MAX_MESSAGE_BYTES)
    }

    pub fn with_limit(reader: R, writer: W, max_message_bytes: usize) -> Self {
        Self {
            reader,
            writer,
            max_message_bytes,
        }
    }

    /// Read the next message. `Ok(None)` means the remote end closed the
    /// stream cleanly between messages.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let mut header = [0u8; HEADER_LEN];
        let filled = read_full(&mut self.reader, &mut header).await?;
        if filled == 0 {
            debug!("input stream closed");
            return Ok(None);
        }
        if filled < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader(filled));
        }

        let len = u32::from_ne_bytes(header) as usize;
        if len > self.max_message_bytes {
            return Err(ProtocolError::MessageTooLarge {
                len,
                max: self.max_message_bytes,
            });
        }

        let mut payload = vec![0u8; len];
        let read = read_full(&mut self.reader, &mut payload).await?;
        if read < len {
            return Err(ProtocolError::TruncatedBody {
                read,
                expected: len,
            });
        }
        trace!(len, "read message");

        let text = std::str::from_utf8(&payload)?;
        serde_json::from_str(text)
            .map(Some)
            .map_err(ProtocolError::InvalidJson)
    }

    /// Write one message and flush it so the browser sees it immediately.
    pub async fn write_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
        let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::MessageTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;

        self.writer.write_all(&len.to_ne_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        trace!(len, "wrote message");
        Ok(())
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

/// Fill `buf` until it is full or the stream ends; returns the byte count.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
