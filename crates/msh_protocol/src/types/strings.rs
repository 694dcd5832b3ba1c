use crate::types::traits::{ProtocolRead, ProtocolWrite};
use crate::types::var_numbers::VarInt;
use std::io::{self, Read, Write};

// 32767 UTF-16 units, at most 3 UTF-8 bytes each
const MAX_STRING_BYTES: usize = 32767 * 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolString(pub String);

impl ProtocolWrite for ProtocolString {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let bytes = self.0.as_bytes();
        let len = VarInt(bytes.len() as i32);
        let mut bytes_written = len.write_to(writer)?;
        writer.write_all(bytes)?;
        bytes_written += bytes.len();
        Ok(bytes_written)
    }
}

impl ProtocolRead for ProtocolString {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, usize)> {
        let (VarInt(length), mut bytes_read) = VarInt::read_from(reader)?;
        if length < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "String length cannot be negative",
            ));
        }
        if length as usize > MAX_STRING_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("String length {} exceeds {}", length, MAX_STRING_BYTES),
            ));
        }
        let mut buffer = vec![0u8; length as usize];
        reader.read_exact(&mut buffer)?;
        bytes_read += length as usize;

        let string =
            String::from_utf8(buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok((ProtocolString(string), bytes_read))
    }
}
