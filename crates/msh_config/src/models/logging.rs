/// Subsystem tag attached to every log event as the `log_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    ServerManager,
    Lifecycle,
    TcpConnection,
    Proxy,
    PacketProcessing,
    ConfigProvider,
    Motd,
    Console,
    Telemetry,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::ServerManager => "server_manager",
            LogType::Lifecycle => "lifecycle",
            LogType::TcpConnection => "tcp_connection",
            LogType::Proxy => "proxy",
            LogType::PacketProcessing => "packet_processing",
            LogType::ConfigProvider => "config_provider",
            LogType::Motd => "motd",
            LogType::Console => "console",
            LogType::Telemetry => "telemetry",
        }
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the `debugLevel` setting onto a tracing level directive.
pub fn level_for_debug(debug_level: u8) -> &'static str {
    match debug_level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_levels() {
        assert_eq!(level_for_debug(0), "warn");
        assert_eq!(level_for_debug(1), "info");
        assert_eq!(level_for_debug(2), "debug");
        assert_eq!(level_for_debug(7), "trace");
    }

    #[test]
    fn test_log_type_display() {
        assert_eq!(LogType::ServerManager.to_string(), "server_manager");
        assert_eq!(LogType::TcpConnection.as_str(), "tcp_connection");
    }
}
