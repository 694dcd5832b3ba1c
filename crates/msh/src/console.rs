//! Operator commands read from the host's stdin.

use std::sync::Arc;

use msh_config::LogType;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::lifecycle::Lifecycle;
use crate::shutdown::ShutdownController;

const HELP: &str = "commands:\n  \
    msh start   - clear a major error and start the minecraft server\n  \
    msh freeze  - stop the minecraft server\n  \
    msh status  - show server status\n  \
    msh exit    - stop the minecraft server and exit\n  \
    mine <cmd>  - send <cmd> to the minecraft server console\n  \
    help        - show this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Freeze,
    Exit,
    Status,
    Mine(String),
    Help,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match (head, rest) {
            ("help", _) => Self::Help,
            ("msh", "start") => Self::Start,
            ("msh", "freeze") => Self::Freeze,
            ("msh", "exit") => Self::Exit,
            ("msh", "status") => Self::Status,
            ("msh", other) => return Err(format!("unknown msh command: {:?}", other)),
            ("mine", "") => return Err("mine needs a command to send".to_string()),
            ("mine", command) => Self::Mine(command.to_string()),
            (other, _) => return Err(format!("unknown command: {:?}", other)),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone)]
pub struct Console {
    lifecycle: Arc<Lifecycle>,
    shutdown: Arc<ShutdownController>,
}

impl Console {
    pub fn new(lifecycle: Arc<Lifecycle>, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            lifecycle,
            shutdown,
        }
    }

    /// Reads commands until stdin closes or shutdown is triggered.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown_rx.recv() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => self.execute(command).await,
                    Ok(None) => {}
                    Err(e) => warn!(log_type = LogType::Console.as_str(), "{}", e),
                },
                Ok(None) => {
                    debug!(log_type = LogType::Console.as_str(), "stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(
                        log_type = LogType::Console.as_str(),
                        "Failed to read stdin: {}", e
                    );
                    break;
                }
            }
        }
    }

    pub async fn execute(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Start => {
                self.lifecycle.clear_major_error().await;
                if let Err(e) = self.lifecycle.warm().await {
                    warn!(log_type = LogType::Console.as_str(), "msh start: {}", e);
                }
            }
            ConsoleCommand::Freeze => {
                if let Err(e) = self.lifecycle.freeze(true).await {
                    warn!(log_type = LogType::Console.as_str(), "msh freeze: {}", e);
                }
            }
            ConsoleCommand::Exit => {
                self.shutdown.trigger_shutdown("msh exit").await;
            }
            ConsoleCommand::Status => {
                let uptime = self
                    .lifecycle
                    .uptime()
                    .await
                    .map(|d| format!("{}s", d.as_secs()))
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    log_type = LogType::Console.as_str(),
                    "status: {}, sessions: {}, progress: {}, uptime: {}, major error: {}",
                    self.lifecycle.status(),
                    self.lifecycle.active_sessions(),
                    self.lifecycle.load_progress().await,
                    uptime,
                    self.lifecycle
                        .major_error()
                        .await
                        .unwrap_or_else(|| "none".to_string())
                );
            }
            ConsoleCommand::Mine(line) => {
                if let Err(e) = self.lifecycle.send_command(&line).await {
                    warn!(log_type = LogType::Console.as_str(), "mine: {}", e);
                }
            }
            ConsoleCommand::Help => info!(log_type = LogType::Console.as_str(), "{}", HELP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_msh_commands() {
        assert_eq!(ConsoleCommand::parse("msh start"), Ok(Some(ConsoleCommand::Start)));
        assert_eq!(ConsoleCommand::parse("  msh   freeze "), Ok(Some(ConsoleCommand::Freeze)));
        assert_eq!(ConsoleCommand::parse("msh exit"), Ok(Some(ConsoleCommand::Exit)));
        assert_eq!(ConsoleCommand::parse("msh status"), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(ConsoleCommand::parse("help"), Ok(Some(ConsoleCommand::Help)));
        assert_eq!(ConsoleCommand::parse(""), Ok(None));
    }

    #[test]
    fn test_mine_keeps_the_whole_line() {
        assert_eq!(
            ConsoleCommand::parse("mine say hello world"),
            Ok(Some(ConsoleCommand::Mine("say hello world".to_string())))
        );
        assert!(ConsoleCommand::parse("mine").is_err());
    }

    #[test]
    fn test_unknown_commands_are_errors() {
        assert!(ConsoleCommand::parse("msh restart").is_err());
        assert!(ConsoleCommand::parse("stop").is_err());
    }
}
