//! Log-line matchers for the backing server's stdout.
//!
//! Every predicate is a named method so a server whose log format differs
//! (a localized or heavily modded one) can ship its own matcher set without
//! touching the lifecycle code. The vanilla set only understands English logs.

use std::fmt::Debug;

use crate::monitor::ServerEvent;

pub trait LogPatterns: Send + Sync + Debug {
    /// Percentage shown while the spawn area is generated, e.g. `"42%"`.
    fn load_progress(&self, line: &str) -> Option<String>;

    fn is_ready(&self, line: &str) -> bool;

    fn is_stopping(&self, line: &str) -> bool;

    fn player_joined(&self, line: &str) -> Option<String>;

    fn player_left(&self, line: &str) -> bool;

    /// Online player count from the reply to the `list` command.
    fn list_reply(&self, line: &str) -> Option<i64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VanillaLogPatterns;

const INFO_TAG: &str = "INFO";
const LOAD_PROGRESS: &str = "Preparing spawn area: ";
const READY: &str = ": Done (";
const STOPPING: &str = "Stopping";
const PLAYER_JOINED: &str = "UUID of player ";
const PLAYER_LEFT: &str = "lost connection";
const LIST_PREFIX: &str = "There are ";
const LIST_SUFFIX: &str = " of a max";

/// Message part of `[12:00:00] [Server thread/INFO]: message`.
fn message(line: &str) -> &str {
    line.split_once("]: ").map(|(_, msg)| msg).unwrap_or(line)
}

fn is_chat(msg: &str) -> bool {
    msg.starts_with('<') || msg.starts_with('[')
}

impl LogPatterns for VanillaLogPatterns {
    fn load_progress(&self, line: &str) -> Option<String> {
        if !line.contains(INFO_TAG) {
            return None;
        }
        let (_, rest) = line.split_once(LOAD_PROGRESS)?;
        let end = rest.find('%')?;
        let pct = rest[..end].trim();
        if pct.is_empty() || !pct.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(format!("{}%", pct))
    }

    fn is_ready(&self, line: &str) -> bool {
        line.contains(INFO_TAG) && line.contains(READY) && !is_chat(message(line))
    }

    fn is_stopping(&self, line: &str) -> bool {
        let msg = message(line);
        line.contains(INFO_TAG) && msg.contains(STOPPING) && !is_chat(msg)
    }

    fn player_joined(&self, line: &str) -> Option<String> {
        if !line.contains(INFO_TAG) {
            return None;
        }
        let (_, rest) = line.split_once(PLAYER_JOINED)?;
        rest.split_whitespace().next().map(str::to_string)
    }

    fn player_left(&self, line: &str) -> bool {
        line.contains(INFO_TAG) && line.contains(PLAYER_LEFT) && !is_chat(message(line))
    }

    fn list_reply(&self, line: &str) -> Option<i64> {
        let (_, rest) = line.split_once(LIST_PREFIX)?;
        let (count, _) = rest.split_once(LIST_SUFFIX)?;
        count.trim().parse().ok()
    }
}

/// Turns one stdout line into the lifecycle event it announces, if any.
pub fn classify_line(patterns: &dyn LogPatterns, line: &str) -> Option<ServerEvent> {
    if let Some(progress) = patterns.load_progress(line) {
        return Some(ServerEvent::LoadProgress(progress));
    }
    if patterns.is_ready(line) {
        return Some(ServerEvent::Ready);
    }
    if let Some(name) = patterns.player_joined(line) {
        return Some(ServerEvent::PlayerJoined(name));
    }
    if patterns.player_left(line) {
        return Some(ServerEvent::PlayerLeft);
    }
    if patterns.is_stopping(line) {
        return Some(ServerEvent::Stopping);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: VanillaLogPatterns = VanillaLogPatterns;

    #[test]
    fn test_load_progress() {
        let line = "[10:20:31] [Worker-Main-5/INFO]: Preparing spawn area: 83%";
        assert_eq!(P.load_progress(line).as_deref(), Some("83%"));
        assert_eq!(P.load_progress("Preparing spawn area: 83%"), None);
    }

    #[test]
    fn test_ready_ignores_chat() {
        assert!(P.is_ready(
            "[10:20:35] [Server thread/INFO]: Done (4.512s)! For help, type \"help\""
        ));
        assert!(!P.is_ready("[10:21:00] [Server thread/INFO]: <Steve> hey: Done ( lol"));
        assert!(!P.is_ready("[10:21:00] [Server thread/INFO]: Done building the tower"));
    }

    #[test]
    fn test_stopping_ignores_chat() {
        assert!(P.is_stopping("[11:00:00] [Server thread/INFO]: Stopping the server"));
        assert!(P.is_stopping("[11:00:00] [Server thread/INFO]: Stopping server"));
        assert!(!P.is_stopping("[11:00:00] [Server thread/INFO]: <Alex> Stopping by later"));
        assert!(!P.is_stopping("[11:00:00] [Server thread/INFO]: [Server] Stopping soon"));
    }

    #[test]
    fn test_player_join_and_leave() {
        let joined = "[12:00:00] [User Authenticator #1/INFO]: UUID of player gekigek99 is 8c3b41a8-1f40-4a55-a1f4-2b1a0a3dfb7e";
        assert_eq!(P.player_joined(joined).as_deref(), Some("gekigek99"));

        let left = "[12:10:00] [Server thread/INFO]: gekigek99 lost connection: Disconnected";
        assert!(P.player_left(left));
        assert_eq!(classify_line(&P, left), Some(ServerEvent::PlayerLeft));
    }

    #[test]
    fn test_list_reply() {
        assert_eq!(
            P.list_reply("[12:00:00] [Server thread/INFO]: There are 2 of a max of 20 players online: a, b"),
            Some(2)
        );
        assert_eq!(
            P.list_reply("[12:00:00] [Server thread/INFO]: There are 0 of a max of 20 players online:"),
            Some(0)
        );
        assert_eq!(P.list_reply("[12:00:00] [Server thread/INFO]: Unknown command"), None);
    }

    #[test]
    fn test_classify_plain_line() {
        assert_eq!(
            classify_line(&P, "[10:20:30] [Server thread/INFO]: Loading properties"),
            None
        );
        assert_eq!(
            classify_line(&P, "[10:20:35] [Server thread/INFO]: Done (4.512s)! For help, type \"help\""),
            Some(ServerEvent::Ready)
        );
    }
}
