use crate::types::MAX_VARINT_LEN;
use crate::types::traits::{ProtocolRead, ProtocolWrite};
use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(pub i32);

/// Outcome of decoding a VarInt from the front of a partially received buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntPrefix {
    Complete { value: i32, len: usize },
    Incomplete,
    Invalid,
}

impl VarInt {
    pub fn len(&self) -> usize {
        let mut value = self.0 as u32;
        let mut size = 0;
        loop {
            size += 1;
            value >>= 7;
            if value == 0 || size >= MAX_VARINT_LEN {
                break;
            }
        }
        size
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(MAX_VARINT_LEN);
        let mut value = self.0 as u32;

        loop {
            let mut byte = (value as u8) & SEGMENT_BITS;
            value >>= 7;

            if value != 0 {
                byte |= CONTINUE_BIT;
            }

            buffer.put_u8(byte);

            if value == 0 {
                break;
            }
        }

        buffer
    }

    /// Decodes without consuming, so callers can wait for more bytes.
    pub fn peek(buf: &[u8]) -> VarIntPrefix {
        let mut value: u32 = 0;

        for (i, byte) in buf.iter().enumerate() {
            if i >= MAX_VARINT_LEN {
                return VarIntPrefix::Invalid;
            }
            value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
            if byte & CONTINUE_BIT == 0 {
                return VarIntPrefix::Complete {
                    value: value as i32,
                    len: i + 1,
                };
            }
        }

        if buf.len() >= MAX_VARINT_LEN {
            VarIntPrefix::Invalid
        } else {
            VarIntPrefix::Incomplete
        }
    }
}

impl ProtocolWrite for VarInt {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let bytes = self.to_bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

impl ProtocolRead for VarInt {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let mut value: u32 = 0;
        let mut bytes_read = 0;

        loop {
            if bytes_read >= MAX_VARINT_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "VarInt too long (>5 bytes)",
                ));
            }

            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            let byte = buf[0];
            value |= ((byte & SEGMENT_BITS) as u32) << (7 * bytes_read);
            bytes_read += 1;

            if byte & CONTINUE_BIT == 0 {
                break;
            }
        }

        Ok((VarInt(value as i32), bytes_read))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_known_vectors() {
        let cases: [(i32, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (300, &[0xac, 0x02]),
            (765, &[0xfd, 0x05]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];

        for (value, expected) in cases {
            let varint = VarInt(value);
            assert_eq!(&varint.to_bytes()[..], expected, "encoding {}", value);
            assert_eq!(varint.len(), expected.len(), "len of {}", value);

            let (decoded, read) = VarInt::read_from(&mut &expected[..]).unwrap();
            assert_eq!(decoded.0, value);
            assert_eq!(read, expected.len());
        }
    }

    #[test]
    fn test_handshake_protocol_version_decodes() {
        // protocol 758 as sent by a 1.18.2 client in captured handshakes
        let (version, read) = VarInt::read_from(&mut &[246u8, 5][..]).unwrap();
        assert_eq!(version.0, 758);
        assert_eq!(read, 2);
    }

    #[test]
    fn test_peek_reports_incomplete() {
        assert_eq!(VarInt::peek(&[]), VarIntPrefix::Incomplete);
        assert_eq!(VarInt::peek(&[0xac]), VarIntPrefix::Incomplete);
        assert_eq!(
            VarInt::peek(&[0xac, 0x02, 0xff]),
            VarIntPrefix::Complete { value: 300, len: 2 }
        );
    }

    #[test]
    fn test_peek_rejects_overlong() {
        assert_eq!(
            VarInt::peek(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            VarIntPrefix::Invalid
        );
    }

    #[test]
    fn test_read_rejects_overlong() {
        let data = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = VarInt::read_from(&mut &data[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
