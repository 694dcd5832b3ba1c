use std::io;

use thiserror::Error;

pub use msh_config::ConfigError;
pub use msh_protocol::ProtocolError;
pub use msh_server_manager::ServerManagerError;

#[derive(Debug, Error)]
pub enum MshError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server manager error: {0}")]
    ServerManager(#[from] ServerManagerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backing server failure that blocks warming until an operator intervenes.
    #[error("{0}")]
    MajorError(String),

    #[error("server is not empty")]
    NotEmpty,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl MshError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MshError>;
