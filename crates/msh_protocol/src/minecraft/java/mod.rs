pub mod handshake;
pub mod login;
pub mod ping;
pub mod status;
