//! Minecraft protocol subset for msh
//!
//! Only what is needed to tell a status probe from a join attempt, pull the
//! player name out of login-start, and answer a client with an emulated
//! status response, ping echo or disconnect text.

pub mod error;
pub mod minecraft;
pub mod packet;
pub mod types;

pub use error::{ProtocolError, Result};
pub use minecraft::java::handshake::ServerBoundHandshake;
pub use minecraft::java::login::ServerBoundLoginStart;
pub use minecraft::java::ping::read_ping;
pub use minecraft::java::status::{
    StatusResponse, build_status_response, build_text_message, format_motd, parse_online_players,
};
pub use packet::{Frame, MAX_FRAME_LEN, encode_packet, peek_frame, read_frame};
pub use types::{ProtocolRead, ProtocolString, ProtocolWrite, UnsignedShort, VarInt, VarIntPrefix};
