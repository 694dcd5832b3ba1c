use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerManagerError {
    #[error("Process Error: {0}")]
    ProcessError(String),

    #[error("Command Error: {0}")]
    CommandError(String),

    #[error("server process is not running")]
    NotRunning,

    #[error("server process is already running")]
    AlreadyRunning,

    #[error("no reply from server within {0:?}")]
    Timeout(Duration),

    #[error("I/O Error: {0}")]
    IoError(#[from] io::Error),
}
