//! Answers clients on behalf of a backing server that is not serving.

use std::time::Duration;

use bytes::BytesMut;
use msh_config::{LogType, MshConfig};
use msh_protocol::{build_status_response, build_text_message, read_ping};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::classifier::RequestKind;
use crate::error::{MshError, Result};

pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Status response carrying `text` as MOTD for a server list ping, a plain
/// text message (shown as the disconnect reason) otherwise.
pub fn build_message(
    kind: RequestKind,
    text: &str,
    config: &MshConfig,
    favicon: Option<&str>,
) -> Result<BytesMut> {
    let message = match kind {
        RequestKind::Info => build_status_response(
            text,
            &config.server_version_name,
            config.server_protocol_version,
            favicon,
        )?,
        RequestKind::Join | RequestKind::Unknown => build_text_message(text)?,
    };
    Ok(message)
}

/// Writes the emulated message and, for a server list ping, echoes the ping
/// so the client can show a latency. Ping failures are only logged.
pub async fn emulate<S>(
    stream: &mut S,
    kind: RequestKind,
    text: &str,
    config: &MshConfig,
    favicon: Option<&str>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = build_message(kind, text, config, favicon)?;
    stream.write_all(&message).await?;
    stream.flush().await?;

    if kind == RequestKind::Info {
        if let Err(e) = answer_ping(stream).await {
            debug!(
                log_type = LogType::Motd.as_str(),
                "Ping not answered: {}", e
            );
        }
    }
    Ok(())
}

/// Echoes the client's ping packet, skipping a leading status request.
pub async fn answer_ping<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ping = timeout(PING_TIMEOUT, read_ping(stream))
        .await
        .map_err(|_| MshError::timeout("ping"))??;
    stream.write_all(&ping).await?;
    stream.flush().await?;
    Ok(())
}
