//! Byte pump between a client and the backing server.

use std::sync::Arc;
use std::time::Duration;

use msh_config::{LogType, MshConfig};
use msh_protocol::build_text_message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{ClientRequest, RequestKind};
use crate::error::{MshError, Result};
use crate::lifecycle::Lifecycle;
use crate::stats::{Direction, Stats};

const BUFFER_SIZE: usize = 1024;
const MIN_IO_DEADLINE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const CANT_CONNECT_MESSAGE: &str = "can't connect to server... check if minecraft server is running and set the correct target port";

#[derive(Debug, Clone)]
pub struct ProxyPump {
    config: Arc<MshConfig>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<Stats>,
}

impl ProxyPump {
    pub fn new(config: Arc<MshConfig>, lifecycle: Arc<Lifecycle>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            lifecycle,
            stats,
        }
    }

    /// Per read/write deadline; never shorter than the idle window so a quiet
    /// session is not cut before the server would idle anyway.
    fn io_deadline(&self) -> Duration {
        MIN_IO_DEADLINE.max(self.config.idle_shutdown())
    }

    /// Connects `client` to the backing server and forwards bytes both ways
    /// until either side closes. The classification bytes are sent first.
    pub async fn open(&self, mut client: TcpStream, request: ClientRequest) -> Result<()> {
        let target = self.config.target_addr();
        let server = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
            Ok(Ok(server)) => server,
            Ok(Err(e)) => return self.reject(&mut client, &target, e.to_string()).await,
            Err(_) => return self.reject(&mut client, &target, "timed out".to_string()).await,
        };
        self.bridge(client, server, &target, request).await
    }

    async fn bridge<C, S>(
        &self,
        mut client: C,
        mut server: S,
        target: &str,
        request: ClientRequest,
    ) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(e) = server.write_all(&request.consumed).await {
            return self.reject(&mut client, target, e.to_string()).await;
        }
        self.stats.record(Direction::ToServer, request.consumed.len());

        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let counted = request.kind == RequestKind::Join;
        if counted {
            self.lifecycle.session_started();
        }
        debug!(
            log_type = LogType::Proxy.as_str(),
            "Proxying {:?} request to {}", request.kind, target
        );

        let token = CancellationToken::new();
        let deadline = self.io_deadline();
        let to_server = forward(
            client_read,
            server_write,
            Direction::ToServer,
            &self.stats,
            deadline,
            token.clone(),
        );
        let to_client = async {
            forward(
                server_read,
                client_write,
                Direction::ToClient,
                &self.stats,
                deadline,
                token.clone(),
            )
            .await;
            if counted {
                self.lifecycle.session_ended().await;
            }
        };
        tokio::join!(to_server, to_client);

        debug!(log_type = LogType::Proxy.as_str(), "Proxy session closed");
        Ok(())
    }

    async fn reject<C>(&self, client: &mut C, target: &str, reason: String) -> Result<()>
    where
        C: AsyncWrite + Unpin,
    {
        warn!(
            log_type = LogType::Proxy.as_str(),
            "Failed to reach backing server at {}: {}", target, reason
        );
        let message = build_text_message(CANT_CONNECT_MESSAGE)?;
        if let Err(e) = client.write_all(&message).await {
            debug!(
                log_type = LogType::Proxy.as_str(),
                "Failed to notify client: {}", e
            );
        }
        let _ = client.shutdown().await;
        Err(MshError::connection(format!("{}: {}", target, reason)))
    }
}

/// Copies `src` into `dst` until EOF, an error, a deadline or cancellation
/// by the opposite direction, then cancels that direction in turn.
async fn forward<R, W>(
    mut src: R,
    mut dst: W,
    direction: Direction,
    stats: &Stats,
    deadline: Duration,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = timeout(deadline, src.read(&mut buf)) => read,
        };
        let n = match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(
                    log_type = LogType::Proxy.as_str(),
                    "{:?} read failed: {}", direction, e
                );
                break;
            }
            Err(_) => {
                info!(
                    log_type = LogType::Proxy.as_str(),
                    "{:?} idle for {:?}, closing session", direction, deadline
                );
                break;
            }
        };

        match timeout(deadline, dst.write_all(&buf[..n])).await {
            Ok(Ok(())) => stats.record(direction, n),
            Ok(Err(e)) => {
                debug!(
                    log_type = LogType::Proxy.as_str(),
                    "{:?} write failed: {}", direction, e
                );
                break;
            }
            Err(_) => break,
        }
    }

    token.cancel();
    let _ = dst.shutdown().await;
}
