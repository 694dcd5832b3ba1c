/// Lifecycle events raised by the stdout scanner and the exit monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    LoadProgress(String),
    Ready,
    Stopping,
    PlayerJoined(String),
    PlayerLeft,
    /// Always the last event of a process; `None` when killed by a signal.
    Exited { code: Option<i32> },
}
