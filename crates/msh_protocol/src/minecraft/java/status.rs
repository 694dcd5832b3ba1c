//! Emulated status response and text (disconnect) messages.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::encode_packet;
use crate::types::{ProtocolString, ProtocolWrite};

pub const CLIENTBOUND_RESPONSE_ID: i32 = 0x00;
pub const CLIENTBOUND_DISCONNECT_ID: i32 = 0x00;

pub const FAVICON_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub description: DescriptionJSON,
    pub players: PlayersJSON,
    pub version: VersionJSON,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionJSON {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersJSON {
    pub max: i32,
    pub online: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionJSON {
    pub name: String,
    pub protocol: i32,
}

#[derive(Serialize)]
struct TextJSON<'a> {
    text: &'a str,
}

impl StatusResponse {
    pub fn new(motd: &str, version_name: &str, protocol: i32, favicon: Option<&str>) -> Self {
        Self {
            description: DescriptionJSON {
                text: format_motd(motd),
            },
            players: PlayersJSON { max: 0, online: 0 },
            version: VersionJSON {
                name: version_name.to_string(),
                protocol,
            },
            favicon: favicon.filter(|f| !f.is_empty()).map(|f| {
                if f.starts_with(FAVICON_PREFIX) {
                    f.to_string()
                } else {
                    format!("{}{}", FAVICON_PREFIX, f)
                }
            }),
        }
    }

    pub fn to_packet(&self) -> Result<BytesMut> {
        let json = serde_json::to_string(self)?;
        string_packet(CLIENTBOUND_RESPONSE_ID, json)
    }
}

/// Applies Minecraft formatting conventions to a configured MOTD: a line
/// break also resets formatting, and `&` stands for the section sign.
pub fn format_motd(motd: &str) -> String {
    motd.replace("\\n", "\n")
        .replace('\n', "§r\n")
        .replace('&', "§")
}

pub fn build_status_response(
    motd: &str,
    version_name: &str,
    protocol: i32,
    favicon: Option<&str>,
) -> Result<BytesMut> {
    StatusResponse::new(motd, version_name, protocol, favicon).to_packet()
}

/// `{"text": ...}` framed as packet 0x00, valid both as a login disconnect
/// and as a status response body the client will show as-is.
pub fn build_text_message(text: &str) -> Result<BytesMut> {
    let json = serde_json::to_string(&TextJSON { text })?;
    string_packet(CLIENTBOUND_DISCONNECT_ID, json)
}

/// Reads `players.online` out of a status response returned by a real server.
pub fn parse_online_players(json: &str) -> Result<i64> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    value
        .get("players")
        .and_then(|players| players.get("online"))
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| crate::error::ProtocolError::malformed("status response has no players.online"))
}

fn string_packet(id: i32, json: String) -> Result<BytesMut> {
    let mut body = Vec::with_capacity(json.len() + 3);
    ProtocolString(json).write_to(&mut body)?;
    Ok(encode_packet(id, &body))
}
