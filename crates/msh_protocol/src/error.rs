use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid packet length: {length} (max: {max})")]
    InvalidLength { length: usize, max: usize },

    #[error("Unexpected packet id: {0:#04x}")]
    UnexpectedPacket(i32),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

impl ProtocolError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
