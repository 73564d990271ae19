//! Length-prefixed frame codec for parley envelopes.
//!
//! # Wire format
//!
//! ```text
//! FRAME: [4 bytes BE: payload length][payload: envelope JSON, UTF-8]
//! ```
//!
//! One frame carries exactly one [`Envelope`]. The length prefix lets the
//! receiver determine the full extent of a message without relying on
//! connection close. This module is pure transport framing; it knows
//! nothing about authentication or routing.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use parley_protocol::{Envelope, MAX_FRAME_SIZE};

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("frame of {got} bytes exceeds limit of {limit}")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("connection closed")]
    Closed,
}

/// Writes one envelope as a length-prefixed frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), WireError> {
    // Serializing an envelope cannot fail (no maps with non-string keys),
    // but route the error anyway rather than panicking.
    let payload = serde_json::to_vec(envelope).map_err(WireError::Decode)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            got: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one complete frame and decodes it into an envelope.
///
/// Returns [`WireError::Closed`] on a clean EOF between frames; an EOF in
/// the middle of a frame surfaces as [`WireError::Io`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope, WireError> {
    // Fill the prefix byte by byte so a clean close (EOF before any byte)
    // stays distinguishable from a truncation inside the prefix.
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(WireError::Closed);
            }
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection dropped inside a frame length prefix",
            )));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(prefix) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            got: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(WireError::Decode)
}
