//! Shutdown coordination for graceful termination

use std::sync::Arc;
use std::time::Duration;

use msh_config::LogType;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::lifecycle::{KILL_GRACE, Lifecycle, Status};

/// Upper bound on waiting for the server to exit when killing is disabled.
const EXIT_WAIT_WITHOUT_KILL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ShutdownController {
    tx: Mutex<broadcast::Sender<()>>,
    shutdown_triggered: Mutex<bool>,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(1);
        Arc::new(Self {
            tx: Mutex::new(tx),
            shutdown_triggered: Mutex::new(false),
        })
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let tx = self.tx.lock().await;
        tx.subscribe()
    }

    pub async fn trigger_shutdown(&self, reason: &str) {
        let mut triggered = self.shutdown_triggered.lock().await;
        if *triggered {
            debug!(
                log_type = LogType::Lifecycle.as_str(),
                "Shutdown already in progress, ignoring additional request"
            );
            return;
        }

        info!(
            log_type = LogType::Lifecycle.as_str(),
            "Initiating shutdown: {}", reason
        );
        *triggered = true;

        let tx = self.tx.lock().await;
        let _ = tx.send(());
    }

    pub async fn is_shutdown_triggered(&self) -> bool {
        let triggered = self.shutdown_triggered.lock().await;
        *triggered
    }
}

/// Resolves on the first termination signal and returns its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(windows)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};

    let mut interrupt = ctrl_c()?;
    let mut brk = ctrl_break()?;
    let mut close = ctrl_close()?;

    let name = tokio::select! {
        _ = interrupt.recv() => "CTRL_C",
        _ = brk.recv() => "CTRL_BREAK",
        _ = close.recv() => "CTRL_CLOSE",
    };
    Ok(name)
}

#[cfg(not(any(unix, windows)))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("CTRL_C")
}

/// Forces the backing server down and waits for it to exit.
///
/// Proxy sessions are left alone; they end when the server closes its side.
pub async fn graceful_shutdown(lifecycle: &Lifecycle, stop_allow_kill_after: u64) {
    if let Err(e) = lifecycle.freeze(true).await {
        warn!(
            log_type = LogType::Lifecycle.as_str(),
            "Forced freeze failed: {}", e
        );
    }

    if lifecycle.status() == Status::Offline {
        return;
    }

    let bound = if stop_allow_kill_after > 0 {
        Duration::from_secs(stop_allow_kill_after) + KILL_GRACE + Duration::from_secs(5)
    } else {
        EXIT_WAIT_WITHOUT_KILL
    };
    info!(
        log_type = LogType::Lifecycle.as_str(),
        "Waiting up to {}s for the minecraft server to exit",
        bound.as_secs()
    );
    if !lifecycle
        .wait_for_status(bound, |status| *status == Status::Offline)
        .await
    {
        warn!(
            log_type = LogType::Lifecycle.as_str(),
            "Minecraft server still running, exiting anyway"
        );
    }
}
