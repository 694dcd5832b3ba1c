use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::ServerManagerError;
use crate::monitor::ServerEvent;
use crate::patterns::{LogPatterns, VanillaLogPatterns, classify_line};
use crate::process::provider::ProcessProvider;
use crate::process::tree::ProcessTree;

const EVENT_CHANNEL_SIZE: usize = 64;
// how long the exit monitor waits for stdout to drain before reporting the exit
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Owns the backing server process and its stdio pipes.
#[derive(Clone, Debug)]
pub struct ProcessManager {
    patterns: Arc<dyn LogPatterns>,
    echo_output: bool,
    tree: Arc<Mutex<Option<Arc<ProcessTree>>>>,
    stdin: Arc<AsyncMutex<Option<ChildStdin>>>,
    // single-slot rendezvous between execute() and the stdout scanner
    reply_slot: ReplySlot,
    logged_players: Arc<AtomicI64>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::with_patterns(Arc::new(VanillaLogPatterns))
    }

    pub fn with_patterns(patterns: Arc<dyn LogPatterns>) -> Self {
        Self {
            patterns,
            echo_output: true,
            tree: Arc::new(Mutex::new(None)),
            stdin: Arc::new(AsyncMutex::new(None)),
            reply_slot: Arc::new(Mutex::new(None)),
            logged_players: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Whether server output is copied to this process's stdout.
    pub fn with_echo(mut self, echo_output: bool) -> Self {
        self.echo_output = echo_output;
        self
    }

    fn current_tree(&self) -> Result<Arc<ProcessTree>, ServerManagerError> {
        match self.tree.lock() {
            Ok(tree) => tree.clone().ok_or(ServerManagerError::NotRunning),
            Err(_) => Err(ServerManagerError::ProcessError(
                "process state lock poisoned".to_string(),
            )),
        }
    }

    fn build_command(dir: &Path, command: &str) -> Result<Command, ServerManagerError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            ServerManagerError::CommandError("server launch command is empty".to_string())
        })?;

        let mut command_builder = Command::new(program);
        command_builder
            .args(parts)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        command_builder.process_group(0);

        #[cfg(windows)]
        command_builder
            .creation_flags(windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP);

        Ok(command_builder)
    }

    async fn write_line(&self, stdin: &mut ChildStdin, line: &str) -> Result<(), ServerManagerError> {
        let input = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{}\n", line)
        };
        stdin.write_all(input.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn clear_reply_slot(&self) {
        if let Ok(mut slot) = self.reply_slot.lock() {
            slot.take();
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

struct Scanner {
    patterns: Arc<dyn LogPatterns>,
    echo_output: bool,
    reply_slot: ReplySlot,
    logged_players: Arc<AtomicI64>,
    events: mpsc::Sender<ServerEvent>,
}

impl Scanner {
    async fn run<R: AsyncRead + Unpin>(self, stdout: R) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_line(line).await,
                Ok(None) => {
                    debug!(log_type = "server_manager", "stdout EOF");
                    break;
                }
                Err(e) => {
                    error!(log_type = "server_manager", "Error reading stdout: {}", e);
                    break;
                }
            }
        }
    }

    async fn handle_line(&self, line: String) {
        if self.echo_output {
            println!("{}", line);
        }
        debug!(log_type = "server_manager", "[server] {}", line);

        let waiting = self.reply_slot.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reply) = waiting {
            let _ = reply.send(line.clone());
        }

        let Some(event) = classify_line(self.patterns.as_ref(), &line) else {
            return;
        };
        match &event {
            ServerEvent::PlayerJoined(_) => {
                self.logged_players.fetch_add(1, Ordering::SeqCst);
            }
            ServerEvent::PlayerLeft => {
                let _ = self
                    .logged_players
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)));
            }
            _ => {}
        }
        if self.events.send(event).await.is_err() {
            debug!(log_type = "server_manager", "Event receiver dropped");
        }
    }
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, echo_output: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if echo_output {
            eprintln!("{}", line);
        }
        warn!(log_type = "server_manager", "[server stderr] {}", line);
    }
}

#[async_trait]
impl ProcessProvider for ProcessManager {
    async fn spawn(
        &self,
        dir: &Path,
        command: &str,
    ) -> Result<mpsc::Receiver<ServerEvent>, ServerManagerError> {
        if self.is_running() {
            return Err(ServerManagerError::AlreadyRunning);
        }

        let mut child = Self::build_command(dir, command)?.spawn().map_err(|e| {
            ServerManagerError::ProcessError(format!("Failed to start process: {}", e))
        })?;

        let pid = child.id().ok_or_else(|| {
            ServerManagerError::ProcessError("process exited before it could be tracked".into())
        })?;
        info!(
            log_type = "server_manager",
            "Server process spawned with pid {} in {}",
            pid,
            dir.display()
        );

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(ServerManagerError::ProcessError(
                    "failed to open server stdio pipes".to_string(),
                ));
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        self.logged_players.store(0, Ordering::SeqCst);
        self.clear_reply_slot();
        *self.stdin.lock().await = Some(stdin);
        if let Ok(mut tree) = self.tree.lock() {
            *tree = Some(Arc::new(ProcessTree::new(pid)));
        }

        let scanner = Scanner {
            patterns: self.patterns.clone(),
            echo_output: self.echo_output,
            reply_slot: self.reply_slot.clone(),
            logged_players: self.logged_players.clone(),
            events: events_tx.clone(),
        };
        let mut stdout_handle = tokio::spawn(scanner.run(stdout));
        let stderr_handle = tokio::spawn(drain_stderr(stderr, self.echo_output));

        let manager = self.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(log_type = "server_manager", "Failed to wait for server process: {}", e);
                    None
                }
            };

            if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut stdout_handle)
                .await
                .is_err()
            {
                stdout_handle.abort();
            }
            stderr_handle.abort();

            // dropping a pending reply sender fails the waiting execute()
            manager.clear_reply_slot();
            manager.stdin.lock().await.take();
            if let Ok(mut tree) = manager.tree.lock() {
                tree.take();
            }

            info!(
                log_type = "server_manager",
                "Server process {} exited with code {:?}", pid, code
            );
            let _ = events_tx.send(ServerEvent::Exited { code }).await;
        });

        Ok(events_rx)
    }

    async fn execute(&self, line: &str, timeout: Duration) -> Result<String, ServerManagerError> {
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard.as_mut().ok_or(ServerManagerError::NotRunning)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        match self.reply_slot.lock() {
            Ok(mut slot) => *slot = Some(reply_tx),
            Err(_) => {
                return Err(ServerManagerError::ProcessError(
                    "reply slot lock poisoned".to_string(),
                ));
            }
        }

        debug!(log_type = "server_manager", "Executing server command: {}", line);
        if let Err(e) = self.write_line(stdin, line).await {
            self.clear_reply_slot();
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ServerManagerError::NotRunning),
            Err(_) => {
                self.clear_reply_slot();
                Err(ServerManagerError::Timeout(timeout))
            }
        }
    }

    async fn send_command(&self, line: &str) -> Result<(), ServerManagerError> {
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard.as_mut().ok_or(ServerManagerError::NotRunning)?;
        debug!(log_type = "server_manager", "Sending server command: {}", line);
        self.write_line(stdin, line).await
    }

    fn suspend_tree(&self) -> Result<(), ServerManagerError> {
        self.current_tree()?.suspend()
    }

    fn resume_tree(&self) -> Result<(), ServerManagerError> {
        self.current_tree()?.resume()
    }

    fn kill_tree(&self) -> Result<(), ServerManagerError> {
        self.current_tree()?.kill()
    }

    fn is_running(&self) -> bool {
        self.tree.lock().map(|tree| tree.is_some()).unwrap_or(false)
    }

    fn logged_players(&self) -> i64 {
        self.logged_players.load(Ordering::SeqCst)
    }
}
