//! Line framing and body encoding.
//!
//! One frame is one line of UTF-8 text terminated by `\n`. File bodies are
//! base64 so they can never contain a separator or a line break.

use base64::{Engine as _, engine::general_purpose};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::ProtocolError;

/// Upper bound for a single TCP frame.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;
/// Upper bound for a UDP datagram, request or reply.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Reads the next frame.
///
/// Returns `Ok(None)` on a clean end of stream (zero-byte read). A stream
/// that ends mid-frame, an over-long frame, or non-UTF-8 bytes are errors;
/// the caller treats all of them as a dead connection.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds maximum length",
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-frame",
        ));
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes `frame` followed by a newline and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = Vec::with_capacity(frame.len() + 1);
    bytes.extend_from_slice(frame.as_bytes());
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

pub fn encode_body(content: &str) -> String {
    general_purpose::STANDARD.encode(content.as_bytes())
}

pub fn decode_body(encoded: &str) -> Result<String, ProtocolError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::BadBody(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ProtocolError::BadBody(e.to_string()))
}
