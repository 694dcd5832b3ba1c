use std::io;

use crate::types::{ProtocolRead, ProtocolString};

pub const SERVERBOUND_LOGIN_START_ID: i32 = 0x00;

/// Usernames are at most 16 characters; anything longer is not a login start.
pub const MAX_NAME_LEN: usize = 16;

/// Login start packet. Newer protocol versions append the player's UUID
/// after the name; it is left unread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBoundLoginStart {
    pub name: String,
}

impl ServerBoundLoginStart {
    pub fn read_from_bytes(data: &[u8]) -> io::Result<Self> {
        let mut reader = data;
        let (ProtocolString(name), _) = ProtocolString::read_from(&mut reader)?;

        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid player name length: {}", name.len()),
            ));
        }

        Ok(Self { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_login_start() {
        let body = [9, b'g', b'e', b'k', b'i', b'g', b'e', b'k', b'9', b'9'];
        let login = ServerBoundLoginStart::read_from_bytes(&body).unwrap();
        assert_eq!(login.name, "gekigek99");
    }

    #[test]
    fn test_login_start_with_trailing_uuid() {
        let mut body = vec![5];
        body.extend_from_slice(b"Steve");
        body.extend_from_slice(&[0xab; 16]);
        let login = ServerBoundLoginStart::read_from_bytes(&body).unwrap();
        assert_eq!(login.name, "Steve");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ServerBoundLoginStart::read_from_bytes(&[0]).is_err());
    }
}
