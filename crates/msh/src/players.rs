//! Online player count of the backing server, cross-checked from several
//! sources before the server is allowed to idle.

use std::time::Duration;

use bytes::BytesMut;
use msh_config::{LogType, MshConfig};
use msh_protocol::{
    ProtocolRead, ProtocolString, ServerBoundHandshake, parse_online_players, read_frame,
};
use msh_server_manager::{LogPatterns, ProcessProvider};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{MshError, Result};

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
const PROBE_PROTOCOL_VERSION: i32 = 765;
const PROBE_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// Status probe and `list` agree.
    Confirmed,
    /// Status probe and `list` disagree; the larger one is kept.
    Disputed,
    Probe,
    List,
    LogEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerCount {
    pub online: i64,
    pub source: CountSource,
}

/// Returns `None` when no source produced a count, which callers must treat
/// as "not empty".
pub async fn count_players_safe(
    config: &MshConfig,
    provider: &dyn ProcessProvider,
    patterns: &dyn LogPatterns,
) -> Option<PlayerCount> {
    let probe = match probe_online_players(&config.target_addr(), config.listen_port).await {
        Ok(online) => Some(online),
        Err(e) => {
            debug!(
                log_type = LogType::Lifecycle.as_str(),
                "Status probe failed: {}", e
            );
            None
        }
    };
    let list = list_online_players(config, provider, patterns).await;

    let count = match (probe, list) {
        (Some(p), Some(l)) if p == l => PlayerCount {
            online: p,
            source: CountSource::Confirmed,
        },
        (Some(p), Some(l)) => PlayerCount {
            online: p.max(l),
            source: CountSource::Disputed,
        },
        (Some(p), None) => PlayerCount {
            online: p,
            source: CountSource::Probe,
        },
        (None, Some(l)) => PlayerCount {
            online: l,
            source: CountSource::List,
        },
        (None, None) if provider.is_running() => PlayerCount {
            online: provider.logged_players().max(0),
            source: CountSource::LogEvents,
        },
        (None, None) => return None,
    };

    debug!(
        log_type = LogType::Lifecycle.as_str(),
        "Players online: {} ({:?})", count.online, count.source
    );
    Some(count)
}

/// Asks the backing server for its status the way a server list would.
pub async fn probe_online_players(target: &str, listen_port: u16) -> Result<i64> {
    let probe = async {
        let mut stream = TcpStream::connect(target).await?;
        let request =
            ServerBoundHandshake::status_probe(PROBE_PROTOCOL_VERSION, PROBE_HOST, listen_port)?;
        stream.write_all(&request).await?;

        let mut buf = BytesMut::with_capacity(1024);
        let (_, body) = read_frame(&mut stream, &mut buf).await?;
        let (ProtocolString(json), _) = ProtocolString::read_from(&mut &body[..])?;
        Ok::<_, MshError>(parse_online_players(&json)?)
    };

    timeout(PROBE_TIMEOUT, probe)
        .await
        .map_err(|_| MshError::timeout("status probe"))?
}

async fn list_online_players(
    config: &MshConfig,
    provider: &dyn ProcessProvider,
    patterns: &dyn LogPatterns,
) -> Option<i64> {
    match provider.execute("list", config.list_command_timeout()).await {
        Ok(line) => {
            let online = patterns.list_reply(&line);
            if online.is_none() {
                debug!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Unexpected reply to list: {}", line
                );
            }
            online
        }
        Err(e) => {
            debug!(
                log_type = LogType::Lifecycle.as_str(),
                "list command failed: {}", e
            );
            None
        }
    }
}
