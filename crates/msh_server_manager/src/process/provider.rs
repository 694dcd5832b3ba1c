use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ServerManagerError;
use crate::monitor::ServerEvent;

/// Control surface over the single backing server process.
///
/// At most one process is live at a time; `spawn` fails with
/// [`ServerManagerError::AlreadyRunning`] otherwise.
#[async_trait]
pub trait ProcessProvider: Send + Sync + Debug {
    /// Launches `command` inside `dir` in its own process group. The returned
    /// channel yields the process's events and closes after
    /// [`ServerEvent::Exited`].
    async fn spawn(
        &self,
        dir: &Path,
        command: &str,
    ) -> Result<mpsc::Receiver<ServerEvent>, ServerManagerError>;

    /// Writes `line` to stdin and returns the next line the server prints.
    async fn execute(&self, line: &str, timeout: Duration) -> Result<String, ServerManagerError>;

    /// Writes `line` to stdin without waiting for output.
    async fn send_command(&self, line: &str) -> Result<(), ServerManagerError>;

    fn suspend_tree(&self) -> Result<(), ServerManagerError>;

    fn resume_tree(&self) -> Result<(), ServerManagerError>;

    fn kill_tree(&self) -> Result<(), ServerManagerError>;

    fn is_running(&self) -> bool;

    /// Players seen joining minus players seen leaving in the log since spawn.
    fn logged_players(&self) -> i64;
}
