//! Backing server state machine.
//!
//! `Lifecycle` is the single owner of the server [`Status`], the idle timer
//! and the load progress. Every transition happens under one mutex; the
//! idle timer and the process event consumer re-enter through it as well.
//!
//! ```text
//! OFFLINE --warm--> STARTING --"Done ("--> ONLINE --idle, suspendAllow--> SUSPENDED
//!    ^                                      |  ^                            |
//!    |                                      |  +-----------warm-------------+
//!    +--exit-- STOPPING <--idle or forced---+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use msh_config::{LogType, MshConfig};
use msh_server_manager::{
    CrashDetector, LogPatterns, ProcessProvider, ServerEvent, ServerManagerError,
    VanillaLogPatterns,
};
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{MshError, Result};
use crate::players::count_players_safe;

/// Wait between `save-all` and the kill on a forced stop.
pub const KILL_GRACE: Duration = Duration::from_secs(10);

pub const CRASH_LOOP_MESSAGE: &str = "minecraft server crashed repeatedly: check the msh log";
pub const SPAWN_FAILED_MESSAGE: &str = "minecraft server failed to start: check the msh log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Offline,
    Starting,
    Online,
    Stopping,
    Suspended,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Offline => "OFFLINE",
            Status::Starting => "STARTING",
            Status::Online => "ONLINE",
            Status::Stopping => "STOPPING",
            Status::Suspended => "SUSPENDED",
        }
    }

    /// States in which the idle timer may be pending.
    fn keeps_idle_timer(&self) -> bool {
        matches!(self, Status::Starting | Status::Online | Status::Suspended)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct LifecycleState {
    status: Status,
    load_progress: String,
    major_error: Option<String>,
    started_at: Option<Instant>,
    idle_timer: Option<JoinHandle<()>>,
    // bumped on every arm and cancel so a timer that already woke up can tell it is stale
    timer_generation: u64,
    process_generation: u64,
    crash_detector: CrashDetector,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            status: Status::Offline,
            load_progress: "0%".to_string(),
            major_error: None,
            started_at: None,
            idle_timer: None,
            timer_generation: 0,
            process_generation: 0,
            crash_detector: CrashDetector::default(),
        }
    }
}

pub struct Lifecycle {
    config: Arc<MshConfig>,
    provider: Arc<dyn ProcessProvider>,
    patterns: Arc<dyn LogPatterns>,
    state: Mutex<LifecycleState>,
    status_tx: watch::Sender<Status>,
    active_sessions: AtomicUsize,
    this: Weak<Lifecycle>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("status", &self.status())
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(config: Arc<MshConfig>, provider: Arc<dyn ProcessProvider>) -> Arc<Self> {
        Self::with_patterns(config, provider, Arc::new(VanillaLogPatterns))
    }

    pub fn with_patterns(
        config: Arc<MshConfig>,
        provider: Arc<dyn ProcessProvider>,
        patterns: Arc<dyn LogPatterns>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(Status::Offline);
        Arc::new_cyclic(|this| Self {
            config,
            provider,
            patterns,
            state: Mutex::new(LifecycleState::default()),
            status_tx,
            active_sessions: AtomicUsize::new(0),
            this: this.clone(),
        })
    }

    pub fn status(&self) -> Status {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub async fn load_progress(&self) -> String {
        self.state.lock().await.load_progress.clone()
    }

    pub async fn major_error(&self) -> Option<String> {
        self.state.lock().await.major_error.clone()
    }

    pub async fn set_major_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(log_type = LogType::Lifecycle.as_str(), "Major error: {}", message);
        self.state.lock().await.major_error = Some(message);
    }

    /// Operator acknowledgement of a major error; the crash history goes with it.
    pub async fn clear_major_error(&self) {
        let mut state = self.state.lock().await;
        if state.major_error.take().is_some() {
            info!(log_type = LogType::Lifecycle.as_str(), "Major error cleared");
        }
        state.crash_detector.reset();
    }

    /// Time since the server last reached ONLINE, while it is up.
    pub async fn uptime(&self) -> Option<Duration> {
        self.state.lock().await.started_at.map(|t| t.elapsed())
    }

    pub async fn idle_timer_pending(&self) -> bool {
        self.state.lock().await.idle_timer.is_some()
    }

    /// Passes an operator command straight to the server console.
    pub async fn send_command(&self, line: &str) -> Result<()> {
        Ok(self.provider.send_command(line).await?)
    }

    /// Brings the server toward ONLINE: spawns it when OFFLINE, resumes it
    /// when SUSPENDED. Always ends by re-arming the idle timer.
    pub async fn warm(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.major_error {
            return Err(MshError::MajorError(message.clone()));
        }

        match state.status {
            Status::Offline => self.start_server(&mut state).await?,
            Status::Suspended => {
                info!(log_type = LogType::Lifecycle.as_str(), "Resuming minecraft server");
                self.provider.resume_tree()?;
                self.set_status(&mut state, Status::Online);
            }
            Status::Starting | Status::Online | Status::Stopping => {}
        }

        self.arm_idle_timer(&mut state);
        Ok(())
    }

    /// Moves the server toward SUSPENDED or OFFLINE.
    ///
    /// Without `force` the server must be ONLINE and empty, otherwise
    /// [`MshError::NotEmpty`] is returned. With `force` a stop command is
    /// issued even with players online, and the process tree is killed if it
    /// is still alive `stopAllowKillAfter` seconds later.
    pub async fn freeze(&self, force: bool) -> Result<()> {
        let state = self.state.lock().await;
        self.freeze_locked(state, force).await
    }

    /// Cancels any pending idle timer and starts a new one.
    pub async fn schedule_freeze(&self) {
        let mut state = self.state.lock().await;
        self.arm_idle_timer(&mut state);
    }

    pub fn session_started(&self) -> usize {
        let active = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            log_type = LogType::Lifecycle.as_str(),
            "A client joined the server ({} active)", active
        );
        active
    }

    pub async fn session_ended(&self) {
        let previous = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        info!(
            log_type = LogType::Lifecycle.as_str(),
            "A client left the server ({} active)",
            previous.saturating_sub(1)
        );
        self.schedule_freeze().await;
    }

    /// Waits until `predicate` holds for the status, or `timeout` passes.
    pub async fn wait_for_status<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: FnMut(&Status) -> bool,
    {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(predicate))
            .await
            .map(|reached| reached.is_ok())
            .unwrap_or(false)
    }

    fn set_status(&self, state: &mut LifecycleState, status: Status) {
        if state.status == status {
            return;
        }
        info!(
            log_type = LogType::Lifecycle.as_str(),
            "Minecraft server status: {} -> {}", state.status, status
        );
        state.status = status;
        self.status_tx.send_replace(status);
    }

    async fn start_server(&self, state: &mut LifecycleState) -> Result<()> {
        info!(
            log_type = LogType::Lifecycle.as_str(),
            "Starting minecraft server: {}", self.config.server_launch_command
        );

        match self
            .provider
            .spawn(&self.config.server_dir, &self.config.server_launch_command)
            .await
        {
            Ok(events) => {
                state.process_generation += 1;
                state.load_progress = "0%".to_string();
                state.started_at = None;
                self.set_status(state, Status::Starting);
                tokio::spawn(Self::consume_events(self.this.clone(), events));
                Ok(())
            }
            Err(e) => {
                error!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Failed to start minecraft server: {}", e
                );
                state.major_error = Some(SPAWN_FAILED_MESSAGE.to_string());
                Err(e.into())
            }
        }
    }

    async fn consume_events(this: Weak<Lifecycle>, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            let Some(lifecycle) = this.upgrade() else {
                break;
            };
            lifecycle.handle_event(event).await;
        }
    }

    async fn handle_event(&self, event: ServerEvent) {
        let mut state = self.state.lock().await;
        match event {
            ServerEvent::LoadProgress(progress) => {
                if state.status == Status::Starting {
                    debug!(
                        log_type = LogType::Lifecycle.as_str(),
                        "Loading progress: {}", progress
                    );
                    state.load_progress = progress;
                }
            }
            ServerEvent::Ready => {
                if state.status == Status::Starting {
                    state.started_at = Some(Instant::now());
                    state.load_progress = "100%".to_string();
                    self.set_status(&mut state, Status::Online);
                    self.arm_idle_timer(&mut state);
                }
            }
            ServerEvent::Stopping => {
                if state.status.keeps_idle_timer() {
                    self.cancel_idle_timer(&mut state);
                    self.set_status(&mut state, Status::Stopping);
                }
            }
            ServerEvent::PlayerJoined(name) => {
                info!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Player {} logged in", name
                );
            }
            ServerEvent::PlayerLeft => {
                debug!(log_type = LogType::Lifecycle.as_str(), "A player logged out");
            }
            ServerEvent::Exited { code } => {
                let expected = state.status == Status::Stopping;
                self.cancel_idle_timer(&mut state);
                state.load_progress = "0%".to_string();
                state.started_at = None;
                self.set_status(&mut state, Status::Offline);

                if expected {
                    info!(
                        log_type = LogType::Lifecycle.as_str(),
                        "Minecraft server stopped (exit code {:?})", code
                    );
                } else {
                    warn!(
                        log_type = LogType::Lifecycle.as_str(),
                        "Minecraft server exited unexpectedly (exit code {:?})", code
                    );
                    if state.crash_detector.record_crash(Instant::now()) {
                        error!(
                            log_type = LogType::Lifecycle.as_str(),
                            "Minecraft server is crash looping, warming disabled until `msh start`"
                        );
                        state.major_error = Some(CRASH_LOOP_MESSAGE.to_string());
                    }
                }
            }
        }
    }

    async fn freeze_locked(
        &self,
        mut state: MutexGuard<'_, LifecycleState>,
        force: bool,
    ) -> Result<()> {
        if state.status == Status::Starting {
            if !force {
                debug!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Server is still starting, freeze rescheduled"
                );
                self.arm_idle_timer(&mut state);
                return Ok(());
            }

            // release the lock so clients can still warm while we wait
            drop(state);
            let grace = self.config.startup_grace();
            if !self
                .wait_for_status(grace, |status| *status != Status::Starting)
                .await
            {
                warn!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Server still starting after {:?}, stopping it anyway", grace
                );
            }
            state = self.state.lock().await;
        }

        match state.status {
            Status::Offline | Status::Stopping => Ok(()),
            Status::Starting => self.stop_server(&mut state, true).await,
            Status::Online | Status::Suspended if force => self.stop_server(&mut state, true).await,
            Status::Suspended if self.config.suspend_allow => {
                debug!(
                    log_type = LogType::Lifecycle.as_str(),
                    "Server already suspended"
                );
                self.arm_idle_timer(&mut state);
                Ok(())
            }
            Status::Online | Status::Suspended => self.idle_freeze(&mut state).await,
        }
    }

    async fn idle_freeze(&self, state: &mut LifecycleState) -> Result<()> {
        let sessions = self.active_sessions();
        if sessions > 0 {
            debug!(
                log_type = LogType::Lifecycle.as_str(),
                "{} sessions still active, not freezing", sessions
            );
            return Err(MshError::NotEmpty);
        }

        if state.status == Status::Online {
            match count_players_safe(&self.config, self.provider.as_ref(), self.patterns.as_ref())
                .await
            {
                Some(count) if count.online == 0 => {}
                Some(count) => {
                    info!(
                        log_type = LogType::Lifecycle.as_str(),
                        "{} players online ({:?}), not freezing", count.online, count.source
                    );
                    return Err(MshError::NotEmpty);
                }
                None => {
                    warn!(
                        log_type = LogType::Lifecycle.as_str(),
                        "Could not determine the player count, not freezing"
                    );
                    return Err(MshError::NotEmpty);
                }
            }
        }

        if self.config.suspend_allow {
            info!(log_type = LogType::Lifecycle.as_str(), "Suspending idle minecraft server");
            self.provider.suspend_tree()?;
            self.set_status(state, Status::Suspended);
            self.arm_idle_timer(state);
            Ok(())
        } else {
            self.stop_server(state, false).await
        }
    }

    async fn stop_server(&self, state: &mut LifecycleState, force: bool) -> Result<()> {
        if state.status == Status::Suspended {
            self.provider.resume_tree()?;
            self.set_status(state, Status::Online);
        }
        self.cancel_idle_timer(state);

        info!(
            log_type = LogType::Lifecycle.as_str(),
            "Stopping minecraft server (forced: {})", force
        );
        match self
            .provider
            .execute(&self.config.stop_command, self.config.list_command_timeout())
            .await
        {
            // the command is written even when the server stays silent, and a
            // server that exits on `stop` before replying fails the reply with NotRunning
            Ok(_) | Err(ServerManagerError::Timeout(_)) | Err(ServerManagerError::NotRunning) => {}
            Err(e) => return Err(e.into()),
        }
        self.set_status(state, Status::Stopping);

        if force && self.config.stop_allow_kill_after > 0 {
            let this = self.this.clone();
            let generation = state.process_generation;
            let delay = Duration::from_secs(self.config.stop_allow_kill_after);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(lifecycle) = this.upgrade() {
                    lifecycle.kill_after_timeout(generation).await;
                }
            });
        }
        Ok(())
    }

    /// Last resort after a forced stop: `save-all`, then kill the whole tree.
    async fn kill_after_timeout(&self, generation: u64) {
        if !self.process_alive(generation).await {
            return;
        }
        warn!(
            log_type = LogType::Lifecycle.as_str(),
            "Minecraft server still running {}s after stop, saving and killing it",
            self.config.stop_allow_kill_after
        );
        if let Err(e) = self.provider.send_command("save-all").await {
            debug!(
                log_type = LogType::Lifecycle.as_str(),
                "save-all not delivered: {}", e
            );
        }

        tokio::time::sleep(KILL_GRACE).await;
        if !self.process_alive(generation).await {
            return;
        }
        if let Err(e) = self.provider.kill_tree() {
            error!(
                log_type = LogType::Lifecycle.as_str(),
                "Failed to kill minecraft server: {}", e
            );
        }
    }

    async fn process_alive(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        state.status != Status::Offline && state.process_generation == generation
    }

    fn cancel_idle_timer(&self, state: &mut LifecycleState) {
        state.timer_generation += 1;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
    }

    fn arm_idle_timer(&self, state: &mut LifecycleState) {
        self.cancel_idle_timer(state);
        if !state.status.keeps_idle_timer() {
            return;
        }

        let generation = state.timer_generation;
        let delay = self.config.idle_shutdown();
        let this = self.this.clone();
        debug!(
            log_type = LogType::Lifecycle.as_str(),
            "Idle freeze scheduled in {}s",
            delay.as_secs()
        );
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(lifecycle) = this.upgrade() {
                lifecycle.idle_timer_fired(generation).await;
            }
        }));
    }

    async fn idle_timer_fired(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.timer_generation != generation {
            return;
        }
        state.idle_timer = None;
        debug!(log_type = LogType::Lifecycle.as_str(), "Idle timer fired");

        match self.freeze_locked(state, false).await {
            Ok(()) => {}
            Err(MshError::NotEmpty) => {
                // players reached the server some other way, check again later
                if self.active_sessions() == 0 {
                    self.schedule_freeze().await;
                }
            }
            Err(e) => warn!(
                log_type = LogType::Lifecycle.as_str(),
                "Idle freeze failed: {}", e
            ),
        }
    }
}
