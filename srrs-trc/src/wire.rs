//! Async message I/O over a byte stream.

use crate::error::TrcError;
use srrs_protocol::{codec, LineDecoder, Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default read buffer size (8 KiB).
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Reads JSON-line messages from `R`.
pub struct MessageReader<R> {
    inner: R,
    decoder: LineDecoder,
    buf: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: LineDecoder::new(),
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Reads the next message.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn next(&mut self) -> Result<Message, TrcError> {
        loop {
            if let Some(message) = self.decoder.decode_message()? {
                tracing::debug!(
                    msg_type = %message.msg_type,
                    message_id = %message.message_id,
                    parent_id = ?message.parent_id.as_ref().map(|id| id.as_str()),
                    "Decoded message"
                );
                return Ok(message);
            }
            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }
}

/// Encodes `message` and writes it as one line.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), TrcError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = codec::encode(message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
