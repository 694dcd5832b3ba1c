//! Ping echo after an emulated status response.
//!
//! Clients usually send the ping `[0x09, 0x01, <8 bytes>]` on its own, but
//! some deliver the status request `[0x01, 0x00]` ahead of it, in the same
//! read or a separate one. The ping itself may also be split across reads.

use bytes::BytesMut;
use tokio::io::AsyncRead;

use super::handshake::SERVERBOUND_STATUS_REQUEST_ID;
use crate::error::{ProtocolError, Result};
use crate::packet::{encode_packet, read_frame};

pub const SERVERBOUND_PING_ID: i32 = 0x01;

/// Reads frames until the ping arrives and returns the packet to echo.
/// Status requests in front of it are skipped.
pub async fn read_ping<R>(reader: &mut R) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(32);
    loop {
        match read_frame(reader, &mut buf).await? {
            (SERVERBOUND_PING_ID, payload) => return Ok(encode_packet(SERVERBOUND_PING_ID, &payload)),
            (SERVERBOUND_STATUS_REQUEST_ID, _) => continue,
            (id, _) => {
                return Err(ProtocolError::malformed(format!(
                    "unexpected packet {:#04x} while waiting for ping",
                    id
                )));
            }
        }
    }
}
