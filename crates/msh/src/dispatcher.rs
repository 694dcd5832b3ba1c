//! Accept loop and per-connection routing.

use std::net::SocketAddr;
use std::sync::Arc;

use msh_config::{LogType, MshConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::classifier::{ConnectionClassifier, RequestKind};
use crate::error::{MshError, Result};
use crate::lifecycle::{Lifecycle, Status};
use crate::proxy::ProxyPump;
use crate::responder::emulate;
use crate::stats::Stats;

pub const UNKNOWN_REQUEST_MESSAGE: &str = "Client request unknown";
pub const NOT_PERMITTED_MESSAGE: &str = "You are not permitted to start this server";
pub const WARM_FAILED_MESSAGE: &str = "An error occurred while warming the server: check the msh log";
pub const START_ISSUED_MESSAGE: &str = "Server start command issued. Please wait...";
pub const STOPPING_MESSAGE: &str = "Server is stopping, please retry in a few seconds";

/// How a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// msh answered on behalf of the backing server.
    Emulated,
    Proxied,
    /// Refused with an error message.
    Rejected,
}

#[derive(Debug)]
pub struct Dispatcher {
    config: Arc<MshConfig>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<Stats>,
    favicon: Option<String>,
    classifier: ConnectionClassifier,
    pump: ProxyPump,
}

impl Dispatcher {
    pub fn new(
        config: Arc<MshConfig>,
        lifecycle: Arc<Lifecycle>,
        stats: Arc<Stats>,
        favicon: Option<String>,
    ) -> Self {
        let classifier =
            ConnectionClassifier::new(config.listen_port, config.classifier_timeout());
        let pump = ProxyPump::new(config.clone(), lifecycle.clone(), stats.clone());
        Self {
            config,
            lifecycle,
            stats,
            favicon,
            classifier,
            pump,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            log_type = LogType::TcpConnection.as_str(),
            "Listening for new clients on {}", addr
        );
        Ok(listener)
    }

    /// Accepts clients until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(log_type = LogType::TcpConnection.as_str(), "Accept loop stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.stats.connection_accepted();
                        let this = Arc::clone(&self);
                        let span = info_span!("connection", id = %Uuid::new_v4(), peer = %peer);
                        tokio::spawn(
                            async move {
                                match this.handle_connection(stream, peer).await {
                                    Ok(outcome) => debug!(
                                        log_type = LogType::TcpConnection.as_str(),
                                        "Connection finished: {:?}", outcome
                                    ),
                                    Err(e) => debug!(
                                        log_type = LogType::TcpConnection.as_str(),
                                        "Connection error: {}", e
                                    ),
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        error!(
                            log_type = LogType::TcpConnection.as_str(),
                            "Failed to accept connection: {}", e
                        );
                    }
                }
            }
        }
    }

    pub async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<Outcome> {
        let client_ip = peer.ip().to_canonical().to_string();
        let request = self.classifier.classify(&mut stream).await;
        let favicon = self.favicon.as_deref();

        if let Some(message) = self.lifecycle.major_error().await {
            let kind = match request.kind {
                RequestKind::Info => RequestKind::Info,
                _ => RequestKind::Join,
            };
            emulate(&mut stream, kind, &message, &self.config, favicon).await?;
            return Ok(Outcome::Rejected);
        }

        if request.kind == RequestKind::Unknown {
            warn!(
                log_type = LogType::TcpConnection.as_str(),
                "Unknown request from {}", client_ip
            );
            emulate(&mut stream, RequestKind::Unknown, UNKNOWN_REQUEST_MESSAGE, &self.config, favicon)
                .await?;
            return Ok(Outcome::Rejected);
        }

        let status = self.lifecycle.status();
        match (status, request.kind) {
            (Status::Offline | Status::Starting, RequestKind::Info) => {
                let motd = if status == Status::Offline {
                    &self.config.hibernation_motd
                } else {
                    &self.config.starting_motd
                };
                info!(
                    log_type = LogType::Motd.as_str(),
                    "Server info requested from {} while {}", client_ip, status
                );
                emulate(&mut stream, RequestKind::Info, motd, &self.config, favicon).await?;
                Ok(Outcome::Emulated)
            }
            (Status::Offline | Status::Starting, _) => {
                let player = request.player_name.as_deref();
                if !self.config.is_whitelisted(player, &client_ip) {
                    info!(
                        log_type = LogType::TcpConnection.as_str(),
                        "Player {:?} ({}) is not whitelisted", player, client_ip
                    );
                    emulate(&mut stream, RequestKind::Join, NOT_PERMITTED_MESSAGE, &self.config, favicon)
                        .await?;
                    return Ok(Outcome::Rejected);
                }

                info!(
                    log_type = LogType::TcpConnection.as_str(),
                    "Player {:?} ({}) requested a server start", player, client_ip
                );
                if let Err(e) = self.lifecycle.warm().await {
                    error!(
                        log_type = LogType::TcpConnection.as_str(),
                        "Failed to warm the server: {}", e
                    );
                    emulate(&mut stream, RequestKind::Join, WARM_FAILED_MESSAGE, &self.config, favicon)
                        .await?;
                    return Ok(Outcome::Rejected);
                }

                let text = format!(
                    "{} {}",
                    START_ISSUED_MESSAGE,
                    self.lifecycle.load_progress().await
                );
                emulate(&mut stream, RequestKind::Join, &text, &self.config, favicon).await?;
                Ok(Outcome::Emulated)
            }
            (Status::Stopping, RequestKind::Info) => {
                emulate(
                    &mut stream,
                    RequestKind::Info,
                    &self.config.hibernation_motd,
                    &self.config,
                    favicon,
                )
                .await?;
                Ok(Outcome::Emulated)
            }
            (Status::Stopping, _) => {
                emulate(&mut stream, RequestKind::Join, STOPPING_MESSAGE, &self.config, favicon)
                    .await?;
                Ok(Outcome::Rejected)
            }
            (Status::Online | Status::Suspended, _) => {
                if let Err(e) = self.lifecycle.warm().await {
                    error!(
                        log_type = LogType::TcpConnection.as_str(),
                        "Failed to warm the server: {}", e
                    );
                    emulate(&mut stream, request.kind, WARM_FAILED_MESSAGE, &self.config, favicon)
                        .await?;
                    return Ok(Outcome::Rejected);
                }

                if request.kind == RequestKind::Join {
                    info!(
                        log_type = LogType::TcpConnection.as_str(),
                        "Player {:?} ({}) joining", request.player_name, client_ip
                    );
                }
                match self.pump.open(stream, request).await {
                    Ok(()) => Ok(Outcome::Proxied),
                    // the client already got the can't-connect message
                    Err(MshError::Connection(_)) => Ok(Outcome::Rejected),
                    Err(e) => Err(e),
                }
            }
        }
    }
}
