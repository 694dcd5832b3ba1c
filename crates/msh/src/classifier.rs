//! First-packet classification of an accepted client connection.

use std::time::Duration;

use msh_config::LogType;
use msh_protocol::minecraft::java::handshake::SERVERBOUND_HANDSHAKE_ID;
use msh_protocol::minecraft::java::login::{MAX_NAME_LEN, SERVERBOUND_LOGIN_START_ID};
use msh_protocol::{Frame, ServerBoundHandshake, ServerBoundLoginStart, peek_frame};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

const READ_CHUNK: usize = 1024;
// a handshake split over more reads than this is treated as garbage
const MAX_HANDSHAKE_READS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Server list ping (next state 1).
    Info,
    /// Login attempt (next state 2).
    Join,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub player_name: Option<String>,
    /// Every byte read from the client while classifying, to be replayed to
    /// the backing server first. Empty exactly when `kind` is `Unknown`.
    pub consumed: Vec<u8>,
}

impl ClientRequest {
    fn unknown() -> Self {
        Self {
            kind: RequestKind::Unknown,
            player_name: None,
            consumed: Vec::new(),
        }
    }
}

enum Parsed {
    Done(RequestKind, usize),
    Incomplete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectionClassifier {
    listen_port: u16,
    read_timeout: Duration,
}

impl ConnectionClassifier {
    pub fn new(listen_port: u16, read_timeout: Duration) -> Self {
        Self {
            listen_port,
            read_timeout,
        }
    }

    pub async fn classify<R>(&self, reader: &mut R) -> ClientRequest
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(READ_CHUNK);
        let mut reads = 0;

        let (kind, end) = loop {
            if !buf.is_empty() {
                match parse_handshake(&buf) {
                    Parsed::Done(kind, end) => break (kind, end),
                    Parsed::Failed => break self.fallback(&buf),
                    Parsed::Incomplete => {}
                }
            }
            if reads == MAX_HANDSHAKE_READS || !self.read_chunk(reader, &mut buf).await {
                break self.fallback(&buf);
            }
            reads += 1;
        };

        if kind == RequestKind::Unknown {
            debug!(
                log_type = LogType::PacketProcessing.as_str(),
                "Unrecognized first packet ({} bytes)",
                buf.len()
            );
            return ClientRequest::unknown();
        }

        let mut player_name = None;
        if kind == RequestKind::Join {
            player_name = match login_name(&buf[end..]) {
                Some(name) => Some(name),
                None => {
                    // login start usually comes in its own segment
                    if self.read_chunk(reader, &mut buf).await {
                        login_name(&buf[end..])
                    } else {
                        None
                    }
                }
            }
            .or_else(|| loose_name(&buf[end..]));
        }

        debug!(
            log_type = LogType::PacketProcessing.as_str(),
            "Classified client request as {:?} (player: {:?})", kind, player_name
        );
        ClientRequest {
            kind,
            player_name,
            consumed: buf,
        }
    }

    /// Appends one read to `buf`; false on EOF, error or timeout.
    async fn read_chunk<R>(&self, reader: &mut R, buf: &mut Vec<u8>) -> bool
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];
        match timeout(self.read_timeout, reader.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => {
                buf.extend_from_slice(&chunk[..n]);
                true
            }
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                debug!(
                    log_type = LogType::PacketProcessing.as_str(),
                    "Client read failed: {}", e
                );
                false
            }
            Err(_) => {
                debug!(
                    log_type = LogType::PacketProcessing.as_str(),
                    "Client sent nothing for {:?}", self.read_timeout
                );
                false
            }
        }
    }

    /// Byte-level detection for packets that do not parse as a handshake:
    /// the next state byte at offset `buf[0]`, then the listen port followed
    /// by a next state byte anywhere in the buffer.
    fn fallback(&self, buf: &[u8]) -> (RequestKind, usize) {
        let Some(&first) = buf.first() else {
            return (RequestKind::Unknown, 0);
        };

        let sentinel = first as usize;
        if let Some(kind) = buf.get(sentinel).and_then(|b| kind_of(*b)) {
            return (kind, sentinel + 1);
        }

        let [hi, lo] = self.listen_port.to_be_bytes();
        buf.windows(3)
            .position(|w| w[0] == hi && w[1] == lo && kind_of(w[2]).is_some())
            .and_then(|pos| kind_of(buf[pos + 2]).map(|kind| (kind, pos + 3)))
            .unwrap_or((RequestKind::Unknown, 0))
    }
}

fn kind_of(next_state: u8) -> Option<RequestKind> {
    match i32::from(next_state) {
        ServerBoundHandshake::STATE_STATUS => Some(RequestKind::Info),
        ServerBoundHandshake::STATE_LOGIN => Some(RequestKind::Join),
        _ => None,
    }
}

fn parse_handshake(buf: &[u8]) -> Parsed {
    match peek_frame(buf) {
        Frame::Complete { id, body, consumed } if id == SERVERBOUND_HANDSHAKE_ID => {
            match ServerBoundHandshake::read_from_bytes(&body) {
                Ok(handshake) if handshake.is_status_request() => {
                    Parsed::Done(RequestKind::Info, consumed)
                }
                Ok(handshake) if handshake.is_login_request() => {
                    Parsed::Done(RequestKind::Join, consumed)
                }
                _ => Parsed::Failed,
            }
        }
        Frame::Complete { .. } | Frame::Invalid => Parsed::Failed,
        Frame::Incomplete => Parsed::Incomplete,
    }
}

fn login_name(rest: &[u8]) -> Option<String> {
    match peek_frame(rest) {
        Frame::Complete { id, body, .. } if id == SERVERBOUND_LOGIN_START_ID => {
            ServerBoundLoginStart::read_from_bytes(&body)
                .ok()
                .map(|login| login.name)
        }
        _ => None,
    }
}

/// Name from `[len][0x00][nameLen][name...]` when the frame itself is cut
/// short or padded.
fn loose_name(rest: &[u8]) -> Option<String> {
    let declared = *rest.get(2)? as usize;
    let start = 3;
    let end = (start + declared).min(rest.len());
    let raw = rest.get(start..end)?;
    let trimmed = match raw.iter().position(|b| *b == 0) {
        Some(pos) => &raw[..pos],
        None => raw,
    };

    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_NAME_LEN
        && trimmed
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_');
    valid.then(|| String::from_utf8_lossy(trimmed).into_owned())
}
