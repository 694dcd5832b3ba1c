//! msh: Minecraft server hibernation.
//!
//! A TCP front-end that stands in for a Minecraft server. While the server
//! is down it answers server-list pings itself and starts the server when a
//! player tries to join; once the server is up it forwards traffic, and
//! after a quiet period it suspends or stops the server again.

pub mod classifier;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod players;
pub mod proxy;
pub mod responder;
pub mod shutdown;
pub mod stats;
pub mod telemetry;

use std::sync::Arc;

use msh_config::{LogType, MshConfig, load_favicon};
use msh_server_manager::{ProcessManager, ProcessProvider};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub use classifier::{ClientRequest, ConnectionClassifier, RequestKind};
pub use console::{Console, ConsoleCommand};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{MshError, Result};
pub use lifecycle::{Lifecycle, Status};
pub use players::{CountSource, PlayerCount, count_players_safe};
pub use proxy::ProxyPump;
pub use shutdown::ShutdownController;
pub use stats::Stats;

pub struct Msh {
    config: Arc<MshConfig>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<Stats>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownController>,
    console: bool,
}

impl Msh {
    pub fn new(config: MshConfig) -> Self {
        Self::with_provider(config, Arc::new(ProcessManager::new()))
    }

    pub fn with_provider(config: MshConfig, provider: Arc<dyn ProcessProvider>) -> Self {
        let config = Arc::new(config);
        let lifecycle = Lifecycle::new(config.clone(), provider);
        let stats = Arc::new(Stats::new(config.show_internet_usage));
        let favicon = load_favicon(&config);
        if favicon.is_none() {
            debug!(log_type = LogType::Motd.as_str(), "No server icon configured");
        }
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            lifecycle.clone(),
            stats.clone(),
            favicon,
        ));

        Self {
            config,
            lifecycle,
            stats,
            dispatcher,
            shutdown: ShutdownController::new(),
            console: true,
        }
    }

    /// Whether operator commands are read from stdin.
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.shutdown.clone()
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.dispatcher.bind().await?;
        self.serve(listener).await
    }

    /// Serves clients on `listener` until a termination signal or `msh exit`,
    /// then forces the backing server down.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe().await;

        let accept_loop = tokio::spawn(
            self.dispatcher
                .clone()
                .run(listener, self.shutdown.subscribe().await),
        );

        if self.config.show_internet_usage {
            tokio::spawn(stats::print_data_usage(
                self.stats.clone(),
                self.shutdown.subscribe().await,
            ));
        }

        let controller = self.shutdown.clone();
        tokio::spawn(async move {
            match shutdown::wait_for_signal().await {
                Ok(name) => {
                    controller
                        .trigger_shutdown(&format!("received {}", name))
                        .await
                }
                Err(e) => error!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Failed to listen for signals: {}", e
                ),
            }
        });

        if self.console {
            let console = Console::new(self.lifecycle.clone(), self.shutdown.clone());
            tokio::spawn(console.run(self.shutdown.subscribe().await));
        }

        info!(log_type = LogType::Lifecycle.as_str(), "msh is running");
        let _ = shutdown_rx.recv().await;

        shutdown::graceful_shutdown(&self.lifecycle, self.config.stop_allow_kill_after).await;
        match accept_loop.await {
            Ok(result) => result?,
            Err(e) => error!(
                log_type = LogType::Lifecycle.as_str(),
                "Accept loop panicked: {}", e
            ),
        }
        info!(log_type = LogType::Lifecycle.as_str(), "msh stopped");
        Ok(())
    }
}
