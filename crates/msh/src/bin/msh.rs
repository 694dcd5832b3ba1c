//! msh - Minecraft server hibernation
//!
//! Command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use msh::Msh;
use msh::telemetry::init_subscriber;
use msh_config::{ConfigOverrides, FileProvider, LogType};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; defaults to msh-config.yml in the working directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    listen_port: Option<u16>,

    #[arg(long)]
    target_port: Option<u16>,

    /// 0 = warnings, 1 = info, 2 = debug, 3 = trace
    #[arg(long)]
    debug_level: Option<u8>,

    /// Suspend the server process instead of stopping it when idle
    #[arg(long)]
    suspend_allow: bool,

    #[arg(long)]
    idle_seconds: Option<u64>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen_port: self.listen_port,
            target_port: self.target_port,
            debug_level: self.debug_level,
            suspend_allow: self.suspend_allow.then_some(true),
            idle_shutdown_seconds: self.idle_seconds,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FileProvider::try_load_config(args.config.as_deref())
        .context("failed to load configuration")?;
    config.merge(&args.overrides());

    init_subscriber(config.debug_level);
    config.validate().context("invalid configuration")?;

    info!(
        log_type = LogType::Lifecycle.as_str(),
        "Starting msh {} on {} for {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr(),
        config.target_addr()
    );

    Msh::new(config).run().await?;
    Ok(())
}
