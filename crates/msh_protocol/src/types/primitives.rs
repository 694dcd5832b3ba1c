use crate::types::traits::{ProtocolRead, ProtocolWrite};
use std::io::{self, Read, Write};

/// Big-endian u16, used for the handshake's server port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedShort(pub u16);

impl ProtocolWrite for UnsignedShort {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&self.0.to_be_bytes())?;
        Ok(2)
    }
}

impl ProtocolRead for UnsignedShort {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        Ok((UnsignedShort(u16::from_be_bytes(buf)), 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_is_big_endian() {
        let mut buffer = Vec::new();
        UnsignedShort(25555).write_to(&mut buffer).unwrap();
        assert_eq!(buffer, vec![99, 211]);

        let (port, read) = UnsignedShort::read_from(&mut &buffer[..]).unwrap();
        assert_eq!(read, 2);
        assert_eq!(port.0, 25555);
    }
}
