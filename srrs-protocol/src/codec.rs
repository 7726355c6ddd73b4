//! Newline-delimited JSON codec.
//!
//! Every message is one JSON record terminated by `\n`.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::MAX_LINE_SIZE;
use bytes::{Buf, BytesMut};

/// Encodes a message as a JSON line.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental line decoder.
///
/// Feed it raw bytes with [`extend`](LineDecoder::extend) and pull complete
/// messages with [`decode_message`](LineDecoder::decode_message).
pub struct LineDecoder {
    buffer: BytesMut,
    /// Bytes before this offset are known to hold no newline.
    scanned: usize,
    max_line: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            max_line,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next message.
    ///
    /// Returns `Ok(None)` when no complete line is buffered yet. Blank lines
    /// are skipped.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == b'\n');
            let Some(pos) = found.map(|i| self.scanned + i) else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line {
                    return Err(ProtocolError::LineTooLong {
                        size: self.buffer.len(),
                        max: self.max_line,
                    });
                }
                return Ok(None);
            };
            if pos > self.max_line {
                return Err(ProtocolError::LineTooLong {
                    size: pos,
                    max: self.max_line,
                });
            }

            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            self.scanned = 0;

            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            if text.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(text)?));
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
