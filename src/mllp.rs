//! MLLP (Minimal Lower Layer Protocol) framing.
//!
//! A record is `0x0B` (start block) followed by payload bytes followed by
//! the trailer `0x1C 0x0D` (end block, carriage return). The deframer
//! anchors on the next start byte after any garbage, matching how real MLLP
//! senders tolerate dropped/partial bytes between records.

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const START_BLOCK: u8 = 0x0B;
pub const END_BLOCK: u8 = 0x1C;
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Errors that can arise while deframing a byte stream.
#[derive(Debug, Error)]
pub enum DeframeError {
    #[error("I/O error while reading MLLP stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrap `payload` in MLLP start/trailer bytes.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(START_BLOCK);
    out.extend_from_slice(payload);
    out.push(END_BLOCK);
    out.push(CARRIAGE_RETURN);
    out
}

/// Read one MLLP record from `reader`.
///
/// Returns `Ok(Some(payload))` for a well-formed record, `Ok(None)` on a
/// clean EOF (no bytes, or EOF while hunting for the start byte), and
/// `Err` only for a genuine I/O error. EOF in the middle of a record (after
/// the start byte was seen but before the trailer) is also reported as
/// `Ok(None)` — the partial buffer is discarded, matching the spec's
/// "truncated record" handling.
pub async fn deframe<R>(reader: &mut R) -> Result<Option<Vec<u8>>, DeframeError>
where
    R: AsyncRead + Unpin,
{
    // Hunt for the start byte, discarding anything before it.
    loop {
        let mut b = [0u8; 1];
        let n = reader.read(&mut b).await?;
        if n == 0 {
            return Ok(None);
        }
        if b[0] == START_BLOCK {
            break;
        }
        // garbage byte, discarded; caller may log at debug level
    }

    let mut buf = BytesMut::new();
    loop {
        let mut b = [0u8; 1];
        let n = reader.read(&mut b).await?;
        if n == 0 {
            // truncated mid-record: discard and report EOF
            return Ok(None);
        }
        let byte = b[0];
        if byte == END_BLOCK {
            // Peek the next byte to see if it completes the trailer.
            let mut next = [0u8; 1];
            let n2 = reader.read(&mut next).await?;
            if n2 == 0 {
                // EOF right after a lone END_BLOCK: still a truncated record.
                return Ok(None);
            }
            if next[0] == CARRIAGE_RETURN {
                return Ok(Some(buf.to_vec()));
            }
            // Not a real trailer: append both bytes verbatim and keep scanning.
            // This matches the reference's de facto interpretation of a
            // lone 0x1C not immediately followed by 0x0D.
            buf.extend_from_slice(&[byte, next[0]]);
            continue;
        }
        buf.extend_from_slice(&[byte]);
    }
}
