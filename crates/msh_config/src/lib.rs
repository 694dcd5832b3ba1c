pub mod error;
pub mod models;
pub mod provider;

pub use error::ConfigError;
pub use models::favicon::{load_favicon, parse_favicon};
pub use models::logging::{LogType, level_for_debug};
pub use models::msh::{ConfigOverrides, MshConfig};
pub use provider::file::{DEFAULT_CONFIG_PATH, FileProvider};
