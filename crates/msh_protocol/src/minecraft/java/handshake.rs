use std::io;

use bytes::BytesMut;

use crate::packet::encode_packet;
use crate::types::{ProtocolRead, ProtocolString, ProtocolWrite, UnsignedShort, VarInt};

pub const SERVERBOUND_HANDSHAKE_ID: i32 = 0x00;
pub const SERVERBOUND_STATUS_REQUEST_ID: i32 = 0x00;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerBoundHandshake {
    pub protocol_version: VarInt,
    pub server_address: ProtocolString,
    pub server_port: UnsignedShort,
    pub next_state: VarInt,
}

impl ServerBoundHandshake {
    pub const STATE_STATUS: i32 = 1;
    pub const STATE_LOGIN: i32 = 2;

    pub fn new(
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: i32,
    ) -> Self {
        Self {
            protocol_version: VarInt(protocol_version),
            server_address: ProtocolString(server_address),
            server_port: UnsignedShort(server_port),
            next_state: VarInt(next_state),
        }
    }

    pub fn is_status_request(&self) -> bool {
        self.next_state.0 == Self::STATE_STATUS
    }

    pub fn is_login_request(&self) -> bool {
        self.next_state.0 == Self::STATE_LOGIN
    }

    /// Parses the packet body (everything after the packet id).
    pub fn read_from_bytes(data: &[u8]) -> io::Result<Self> {
        let mut reader = data;
        let (handshake, _) = Self::read_from(&mut reader)?;
        Ok(handshake)
    }

    pub fn to_packet(&self) -> io::Result<BytesMut> {
        let mut body = Vec::with_capacity(16 + self.server_address.0.len());
        self.write_to(&mut body)?;
        Ok(encode_packet(SERVERBOUND_HANDSHAKE_ID, &body))
    }

    /// Handshake with next state STATUS followed by the empty status request,
    /// the same pair a client's server list sends.
    pub fn status_probe(protocol_version: i32, host: &str, port: u16) -> io::Result<BytesMut> {
        let handshake = Self::new(protocol_version, host.to_string(), port, Self::STATE_STATUS);
        let mut packet = handshake.to_packet()?;
        packet.extend_from_slice(&encode_packet(SERVERBOUND_STATUS_REQUEST_ID, &[]));
        Ok(packet)
    }
}

impl ProtocolWrite for ServerBoundHandshake {
    fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        written += self.protocol_version.write_to(writer)?;
        written += self.server_address.write_to(writer)?;
        written += self.server_port.write_to(writer)?;
        written += self.next_state.write_to(writer)?;
        Ok(written)
    }
}

impl ProtocolRead for ServerBoundHandshake {
    fn read_from<R: io::Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let mut bytes_read = 0;

        let (protocol_version, n) = VarInt::read_from(reader)?;
        bytes_read += n;

        let (server_address, n) = ProtocolString::read_from(reader)?;
        bytes_read += n;

        let (server_port, n) = UnsignedShort::read_from(reader)?;
        bytes_read += n;

        let (next_state, n) = VarInt::read_from(reader)?;
        bytes_read += n;

        Ok((
            Self {
                protocol_version,
                server_address,
                server_port,
                next_state,
            },
            bytes_read,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Frame, peek_frame};

    #[test]
    fn test_read_captured_status_handshake() {
        let body = [246, 5, 9, 49, 50, 55, 46, 48, 46, 48, 46, 49, 99, 211, 1];
        let handshake = ServerBoundHandshake::read_from_bytes(&body).unwrap();

        assert_eq!(handshake.protocol_version.0, 758);
        assert_eq!(handshake.server_address.0, "127.0.0.1");
        assert_eq!(handshake.server_port.0, 25555);
        assert!(handshake.is_status_request());
        assert!(!handshake.is_login_request());
    }

    #[test]
    fn test_status_probe_layout() {
        let probe = ServerBoundHandshake::status_probe(765, "localhost", 25555).unwrap();
        let expected: Vec<u8> = [
            &[16u8, 0, 0xfd, 0x05, 9][..],
            b"localhost",
            &[99, 211, 1, 1, 0],
        ]
        .concat();
        assert_eq!(&probe[..], &expected[..]);

        match peek_frame(&probe) {
            Frame::Complete { id, body, .. } => {
                assert_eq!(id, SERVERBOUND_HANDSHAKE_ID);
                let parsed = ServerBoundHandshake::read_from_bytes(&body).unwrap();
                assert_eq!(parsed.server_address.0, "localhost");
                assert!(parsed.is_status_request());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
