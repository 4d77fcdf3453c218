//! Length + type framing.
//!
//! Every transmitted unit is `[u32 BE total_length][u8 type][payload]` where
//! `total_length = 1 + payload length`. Advertised body lengths outside
//! [1, MAX_FRAME_BYTES] are rejected before any allocation.

use std::io;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_BYTES;
use crate::error::ProtocolError;
use crate::message::{Message, MessageType};

/// Wrap encoded message bytes into one wire frame.
pub fn frame(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let total = 1 + payload.len();
    let mut out = Vec::with_capacity(4 + total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.push(msg_type.as_byte());
    out.extend_from_slice(payload);
    out
}

/// Split one frame into its raw type byte and payload.
///
/// The type byte is returned unvalidated; unknown values are the dispatcher's
/// business (it drops them silently).
pub fn unframe(data: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    if data.len() < 5 {
        return Err(ProtocolError::Framing(format!("frame too short ({} bytes)", data.len())));
    }
    let total = u32::from_be_bytes(data[..4].try_into().expect("4-byte header")) as usize;
    if total < 1 || total > MAX_FRAME_BYTES {
        return Err(ProtocolError::Framing(format!("invalid frame length {total}")));
    }
    if data.len() < 4 + total {
        return Err(ProtocolError::Framing(format!(
            "frame incomplete: need {} bytes, have {}",
            4 + total,
            data.len()
        )));
    }
    Ok((data[4], &data[5..4 + total]))
}

/// Serialise `msg` and write one frame to `w`.
pub async fn write_message<W>(w: &mut W, msg: &dyn Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame(msg.message_type(), &msg.encode());
    w.write_all(&framed).await?;
    w.flush().await
}

/// Read one framed message from `r`, returning the raw type byte and payload.
pub async fn read_message<R>(r: &mut R, max_bytes: usize) -> io::Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; 4];
    r.read_exact(&mut hdr).await?;
    let total = u32::from_be_bytes(hdr) as usize;
    if total < 1 || total > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length {total}"),
        ));
    }
    let mut body = vec![0u8; total];
    r.read_exact(&mut body).await?;
    let payload = body.split_off(1);
    Ok((body[0], payload))
}
