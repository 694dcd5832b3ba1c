use std::{net::IpAddr, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

/// Everything msh reads from `msh-config.yml`.
///
/// Field names follow the camelCase keys of the config file. Missing keys
/// take the values from [`MshConfig::default`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MshConfig {
    pub server_dir: PathBuf,
    pub server_launch_command: String,
    pub stop_command: String,
    /// Seconds to wait after a forced stop before killing the process tree. 0 disables.
    pub stop_allow_kill_after: u64,

    pub listen_host: String,
    pub listen_port: u16,
    pub target_host: String,
    pub target_port: u16,

    pub idle_shutdown_seconds: u64,
    pub suspend_allow: bool,
    pub startup_grace_seconds: u64,

    #[serde(rename = "hibernationMOTD")]
    pub hibernation_motd: String,
    #[serde(rename = "startingMOTD")]
    pub starting_motd: String,
    pub server_version_name: String,
    pub server_protocol_version: i32,

    pub whitelist: Vec<String>,

    pub favicon_base64: String,
    pub server_icon: Option<PathBuf>,

    pub show_internet_usage: bool,
    pub debug_level: u8,

    pub list_command_timeout_millis: u64,
    pub classifier_timeout_seconds: u64,
}

impl Default for MshConfig {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("."),
            server_launch_command: "java -Xmx1024M -Xms1024M -jar server.jar nogui".to_string(),
            stop_command: "stop".to_string(),
            stop_allow_kill_after: 10,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 25555,
            target_host: "127.0.0.1".to_string(),
            target_port: 25565,
            idle_shutdown_seconds: 30,
            suspend_allow: false,
            startup_grace_seconds: 120,
            hibernation_motd: "Server is hibernating. Join to wake it up!".to_string(),
            starting_motd: "Server is starting. Please wait...".to_string(),
            server_version_name: "1.20.4".to_string(),
            server_protocol_version: 765,
            whitelist: Vec::new(),
            favicon_base64: String::new(),
            server_icon: None,
            show_internet_usage: false,
            debug_level: 1,
            list_command_timeout_millis: 2000,
            classifier_timeout_seconds: 5,
        }
    }
}

/// Values given on the command line, applied on top of the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub listen_port: Option<u16>,
    pub target_port: Option<u16>,
    pub debug_level: Option<u8>,
    pub suspend_allow: Option<bool>,
    pub idle_shutdown_seconds: Option<u64>,
}

impl MshConfig {
    pub fn merge(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.listen_port {
            self.listen_port = port;
        }
        if let Some(port) = overrides.target_port {
            self.target_port = port;
        }
        if let Some(level) = overrides.debug_level {
            self.debug_level = level;
        }
        if let Some(suspend) = overrides.suspend_allow {
            self.suspend_allow = suspend;
        }
        if let Some(idle) = overrides.idle_shutdown_seconds {
            self.idle_shutdown_seconds = idle;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_launch_command.split_whitespace().next().is_none() {
            return Err(ConfigError::invalid("serverLaunchCommand is empty"));
        }
        if !self.server_dir.is_dir() {
            return Err(ConfigError::invalid(format!(
                "serverDir {} is not a directory",
                self.server_dir.display()
            )));
        }
        if self.listen_port == self.target_port && same_host(&self.listen_host, &self.target_host)
        {
            return Err(ConfigError::invalid(format!(
                "listenPort and targetPort are both {} on the same host",
                self.listen_port
            )));
        }
        if self.idle_shutdown_seconds == 0 {
            return Err(ConfigError::invalid("idleShutdownSeconds must be at least 1"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        join_host_port(&self.listen_host, self.listen_port)
    }

    pub fn target_addr(&self) -> String {
        join_host_port(&self.target_host, self.target_port)
    }

    pub fn idle_shutdown(&self) -> Duration {
        Duration::from_secs(self.idle_shutdown_seconds)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_seconds)
    }

    pub fn list_command_timeout(&self) -> Duration {
        Duration::from_millis(self.list_command_timeout_millis)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_seconds)
    }

    /// An empty whitelist lets everyone in. Otherwise either the player
    /// name or the client ip must be listed.
    pub fn is_whitelisted(&self, player_name: Option<&str>, client_ip: &str) -> bool {
        if self.whitelist.is_empty() {
            return true;
        }
        self.whitelist
            .iter()
            .any(|entry| Some(entry.as_str()) == player_name || entry == client_ip)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn same_host(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let unspecified_or_loopback = |host: &str| match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_unspecified() || ip.is_loopback(),
        Err(_) => host == "localhost",
    };
    unspecified_or_loopback(a) && unspecified_or_loopback(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> MshConfig {
        MshConfig {
            server_dir: std::env::temp_dir(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_camel_case_keys() {
        let yaml = r#"
serverDir: /srv/minecraft
serverLaunchCommand: java -jar paper.jar nogui
listenPort: 25570
suspendAllow: true
hibernationMOTD: "&6sleeping"
whitelist: [Notch, 10.0.0.2]
"#;
        let config: MshConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server_dir, PathBuf::from("/srv/minecraft"));
        assert_eq!(config.server_launch_command, "java -jar paper.jar nogui");
        assert_eq!(config.listen_port, 25570);
        assert!(config.suspend_allow);
        assert_eq!(config.hibernation_motd, "&6sleeping");
        assert_eq!(config.whitelist, vec!["Notch", "10.0.0.2"]);
        assert_eq!(config.target_port, 25565);
        assert_eq!(config.idle_shutdown_seconds, 30);
    }

    #[test]
    fn test_json_is_accepted() {
        let json = r#"{"listenPort": 25600, "targetHost": "10.0.0.5", "debugLevel": 3}"#;
        let config: MshConfig = serde_yaml::from_str(json).unwrap();
        assert_eq!(config.listen_port, 25600);
        assert_eq!(config.target_addr(), "10.0.0.5:25565");
        assert_eq!(config.debug_level, 3);
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let config = MshConfig {
            server_launch_command: "   ".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_port_loop() {
        let config = MshConfig {
            listen_port: 25565,
            listen_host: "0.0.0.0".to_string(),
            target_host: "127.0.0.1".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let remote = MshConfig {
            listen_port: 25565,
            target_host: "10.0.0.5".to_string(),
            ..valid_config()
        };
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_idle() {
        let config = MshConfig {
            idle_shutdown_seconds: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = MshConfig::default();
        config.merge(&ConfigOverrides {
            listen_port: Some(30000),
            suspend_allow: Some(true),
            ..Default::default()
        });
        assert_eq!(config.listen_port, 30000);
        assert!(config.suspend_allow);
        assert_eq!(config.target_port, 25565);
    }

    #[test]
    fn test_whitelist_matches_name_or_ip() {
        let open = MshConfig::default();
        assert!(open.is_whitelisted(None, "1.2.3.4"));

        let config = MshConfig {
            whitelist: vec!["gekigek99".to_string(), "192.168.1.10".to_string()],
            ..Default::default()
        };
        assert!(config.is_whitelisted(Some("gekigek99"), "8.8.8.8"));
        assert!(config.is_whitelisted(Some("someone"), "192.168.1.10"));
        assert!(!config.is_whitelisted(Some("GEKIGEK99"), "8.8.8.8"));
        assert!(!config.is_whitelisted(None, "8.8.8.8"));
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = MshConfig {
            listen_host: "::".to_string(),
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), "[::]:25555");
    }
}
