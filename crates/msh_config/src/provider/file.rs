use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{ConfigError, LogType, MshConfig};

pub const DEFAULT_CONFIG_PATH: &str = "msh-config.yml";
const FALLBACK_CONFIG_PATHS: [&str; 2] = ["msh-config.yaml", "msh-config.json"];

pub struct FileProvider;

impl FileProvider {
    /// Loads the config file at `path`, or the first of the default names
    /// found in the working directory. YAML parsing also covers JSON files.
    pub fn try_load_config(path: Option<&Path>) -> Result<MshConfig, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path(),
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let config = Self::parse(&path, &content)?;
        info!(
            log_type = LogType::ConfigProvider.as_str(),
            "Loaded configuration from {}",
            path.display()
        );
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<MshConfig, ConfigError> {
        // an empty file deserializes to null, keep the defaults in that case
        if content.trim().is_empty() {
            debug!(
                log_type = LogType::ConfigProvider.as_str(),
                "Config file {} is empty, using defaults",
                path.display()
            );
            return Ok(MshConfig::default());
        }

        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn default_path() -> PathBuf {
        std::iter::once(DEFAULT_CONFIG_PATH)
            .chain(FALLBACK_CONFIG_PATHS)
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}
