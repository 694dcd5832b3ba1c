//! In-memory [`ProcessProvider`] for exercising lifecycle code without a JVM.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ServerManagerError;
use crate::monitor::ServerEvent;
use crate::process::provider::ProcessProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Spawn { dir: PathBuf, command: String },
    Execute(String),
    SendCommand(String),
    SuspendTree,
    ResumeTree,
    KillTree,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    running: bool,
    suspended: bool,
    events: Option<mpsc::Sender<ServerEvent>>,
    list_reply: Option<String>,
    spawn_failure: Option<String>,
    exit_on_command: Option<String>,
    exit_silently: bool,
    logged_players: i64,
}

#[derive(Clone, Debug)]
pub struct MockProcessProvider {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessProvider {
    pub fn new() -> Self {
        let state = MockState {
            list_reply: Some("There are 0 of a max of 20 players online:".to_string()),
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Line returned by `execute("list")`; `None` makes it time out.
    pub fn with_list_reply(self, reply: Option<&str>) -> Self {
        self.state.write().unwrap().list_reply = reply.map(str::to_string);
        self
    }

    pub fn with_spawn_failure(self, message: &str) -> Self {
        self.state.write().unwrap().spawn_failure = Some(message.to_string());
        self
    }

    /// Executing or sending `command` makes the fake server stop and exit.
    pub fn with_exit_on_command(self, command: &str) -> Self {
        self.state.write().unwrap().exit_on_command = Some(command.to_string());
        self
    }

    /// Like [`with_exit_on_command`](Self::with_exit_on_command), but the fake
    /// server dies without logging anything, so `execute` sees the process
    /// vanish before a reply line and fails with `NotRunning`.
    pub fn with_silent_exit_on_command(self, command: &str) -> Self {
        {
            let mut state = self.state.write().unwrap();
            state.exit_on_command = Some(command.to_string());
            state.exit_silently = true;
        }
        self
    }

    pub fn set_logged_players(&self, players: i64) {
        self.state.write().unwrap().logged_players = players;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.read().unwrap().calls.clone()
    }

    pub fn count(&self, call: &MockCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Spawn { .. }))
            .count()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.read().unwrap().suspended
    }

    /// Pushes an event as if the server had logged it.
    pub fn emit(&self, event: ServerEvent) {
        let sender = self.state.read().unwrap().events.clone();
        if let Some(sender) = sender {
            let _ = sender.try_send(event);
        }
    }

    /// Ends the fake process with `code`.
    pub fn exit(&self, code: Option<i32>) {
        let sender = {
            let mut state = self.state.write().unwrap();
            state.running = false;
            state.suspended = false;
            state.events.take()
        };
        if let Some(sender) = sender {
            let _ = sender.try_send(ServerEvent::Exited { code });
        }
    }

    fn record(&self, call: MockCall) {
        self.state.write().unwrap().calls.push(call);
    }

    /// Returns true when `line` ended the fake process without a reply.
    fn stop_if_requested(&self, line: &str) -> bool {
        let (matches, silent) = {
            let state = self.state.read().unwrap();
            (state.exit_on_command.as_deref() == Some(line), state.exit_silently)
        };
        if !matches {
            return false;
        }
        if !silent {
            self.emit(ServerEvent::Stopping);
        }
        self.exit(Some(0));
        silent
    }
}

#[async_trait]
impl ProcessProvider for MockProcessProvider {
    async fn spawn(
        &self,
        dir: &Path,
        command: &str,
    ) -> Result<mpsc::Receiver<ServerEvent>, ServerManagerError> {
        self.record(MockCall::Spawn {
            dir: dir.to_path_buf(),
            command: command.to_string(),
        });

        let mut state = self.state.write().unwrap();
        if let Some(message) = &state.spawn_failure {
            return Err(ServerManagerError::ProcessError(message.clone()));
        }
        if state.running {
            return Err(ServerManagerError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(64);
        state.running = true;
        state.events = Some(tx);
        state.logged_players = 0;
        Ok(rx)
    }

    async fn execute(&self, line: &str, timeout: Duration) -> Result<String, ServerManagerError> {
        self.record(MockCall::Execute(line.to_string()));
        let (running, reply) = {
            let state = self.state.read().unwrap();
            (state.running, state.list_reply.clone())
        };
        if !running {
            return Err(ServerManagerError::NotRunning);
        }

        if line == "list" {
            return match reply {
                Some(reply) => Ok(reply),
                None => {
                    tokio::time::sleep(timeout).await;
                    Err(ServerManagerError::Timeout(timeout))
                }
            };
        }

        if self.stop_if_requested(line) {
            return Err(ServerManagerError::NotRunning);
        }
        Ok(String::new())
    }

    async fn send_command(&self, line: &str) -> Result<(), ServerManagerError> {
        self.record(MockCall::SendCommand(line.to_string()));
        if !self.state.read().unwrap().running {
            return Err(ServerManagerError::NotRunning);
        }
        self.stop_if_requested(line);
        Ok(())
    }

    fn suspend_tree(&self) -> Result<(), ServerManagerError> {
        self.record(MockCall::SuspendTree);
        let mut state = self.state.write().unwrap();
        if !state.running {
            return Err(ServerManagerError::NotRunning);
        }
        state.suspended = true;
        Ok(())
    }

    fn resume_tree(&self) -> Result<(), ServerManagerError> {
        self.record(MockCall::ResumeTree);
        let mut state = self.state.write().unwrap();
        if !state.running {
            return Err(ServerManagerError::NotRunning);
        }
        state.suspended = false;
        Ok(())
    }

    fn kill_tree(&self) -> Result<(), ServerManagerError> {
        self.record(MockCall::KillTree);
        if !self.state.read().unwrap().running {
            return Err(ServerManagerError::NotRunning);
        }
        self.exit(None);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.read().unwrap().running
    }

    fn logged_players(&self) -> i64 {
        self.state.read().unwrap().logged_players
    }
}
