use std::{fs, path::Path};

use base64::{Engine as _, engine::general_purpose};
use tracing::{debug, warn};

use crate::models::logging::LogType;
use crate::models::msh::MshConfig;

const DEFAULT_ICON_NAME: &str = "server-icon.png";

/// Base64 of the PNG at `path`. The image is sent as-is; Minecraft expects 64x64.
pub fn parse_favicon(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(image_data) => {
            debug!(
                log_type = LogType::Motd.as_str(),
                "Loaded favicon from {} ({} bytes)",
                path.display(),
                image_data.len()
            );
            Some(general_purpose::STANDARD.encode(image_data))
        }
        Err(e) => {
            debug!(
                log_type = LogType::Motd.as_str(),
                "No favicon at {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

/// Resolves the favicon sent with emulated status responses.
///
/// `faviconBase64` wins, then `serverIcon`, then `server-icon.png` in the
/// server directory.
pub fn load_favicon(config: &MshConfig) -> Option<String> {
    if !config.favicon_base64.is_empty() {
        return Some(config.favicon_base64.clone());
    }

    if let Some(icon) = &config.server_icon {
        let path = if icon.is_absolute() {
            icon.clone()
        } else {
            config.server_dir.join(icon)
        };
        match parse_favicon(&path) {
            Some(encoded) => return Some(encoded),
            None => warn!(
                log_type = LogType::Motd.as_str(),
                "Configured server icon {} could not be read",
                path.display()
            ),
        }
    }

    parse_favicon(&config.server_dir.join(DEFAULT_ICON_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_base64_wins() {
        let config = MshConfig {
            favicon_base64: "AAAA".to_string(),
            server_icon: Some("missing.png".into()),
            ..Default::default()
        };
        assert_eq!(load_favicon(&config).as_deref(), Some("AAAA"));
    }

    #[test]
    fn test_server_icon_in_server_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("server-icon.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let config = MshConfig {
            server_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert_eq!(load_favicon(&config).as_deref(), Some("iVBORw=="));
    }

    #[test]
    fn test_configured_icon_relative_to_server_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("custom.png"), b"abc").unwrap();

        let config = MshConfig {
            server_dir: dir.path().to_path_buf(),
            server_icon: Some("custom.png".into()),
            ..Default::default()
        };
        assert_eq!(load_favicon(&config).as_deref(), Some("YWJj"));
    }

    #[test]
    fn test_no_icon_anywhere() {
        let dir = TempDir::new().unwrap();
        let config = MshConfig {
            server_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(load_favicon(&config).is_none());
    }
}
