//! Length-prefixed packet framing.
//!
//! Every Minecraft packet on the wire is `[length:VarInt][id:VarInt][body]`,
//! where `length` covers the id and the body. Nothing here deals with
//! compression or encryption: msh only ever looks at the packets exchanged
//! before either is negotiated.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};
use crate::types::{VarInt, VarIntPrefix};

/// Largest frame msh is willing to buffer (2^21 - 1, the three-byte VarInt bound).
pub const MAX_FRAME_LEN: usize = 2_097_151;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Complete {
        id: i32,
        body: Vec<u8>,
        consumed: usize,
    },
    Incomplete,
    Invalid,
}

/// Frames `payload` under packet `id` using canonical VarInts.
pub fn encode_packet(id: i32, payload: &[u8]) -> BytesMut {
    let id = VarInt(id);
    let length = VarInt((id.len() + payload.len()) as i32);

    let mut buffer = BytesMut::with_capacity(length.len() + id.len() + payload.len());
    buffer.extend_from_slice(&length.to_bytes());
    buffer.extend_from_slice(&id.to_bytes());
    buffer.put_slice(payload);
    buffer
}

/// Looks at the front of `buf` for one full frame without consuming it.
pub fn peek_frame(buf: &[u8]) -> Frame {
    let (length, header_len) = match VarInt::peek(buf) {
        VarIntPrefix::Complete { value, len } => (value, len),
        VarIntPrefix::Incomplete => return Frame::Incomplete,
        VarIntPrefix::Invalid => return Frame::Invalid,
    };

    if length <= 0 || length as usize > MAX_FRAME_LEN {
        return Frame::Invalid;
    }

    let end = header_len + length as usize;
    if buf.len() < end {
        return Frame::Incomplete;
    }

    let frame = &buf[header_len..end];
    match VarInt::peek(frame) {
        VarIntPrefix::Complete { value, len } => Frame::Complete {
            id: value,
            body: frame[len..].to_vec(),
            consumed: end,
        },
        _ => Frame::Invalid,
    }
}

/// Reads until one whole frame is buffered, then splits it off `buf`.
///
/// Bytes past the frame stay in `buf` for the next call.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(i32, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    loop {
        match peek_frame(buf) {
            Frame::Complete { id, body, consumed } => {
                let _ = buf.split_to(consumed);
                return Ok((id, body));
            }
            Frame::Invalid => {
                return Err(ProtocolError::malformed("invalid packet frame"));
            }
            Frame::Incomplete => {
                if reader.read_buf(buf).await? == 0 {
                    return Err(ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-packet",
                    )));
                }
            }
        }
    }
}
