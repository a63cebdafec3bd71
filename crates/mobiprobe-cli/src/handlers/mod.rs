//! Command handlers, kept out of main.rs for testability

pub mod config;
pub mod otp;
pub mod proxy;

use crate::{CliResult, Commands};
use mobiprobe::ProbeConfig;
use std::path::Path;

pub use config::{execute_config, load_config, redacted};
pub use otp::{execute_otp, otp_target};
pub use proxy::{apply_proxy_args, execute_proxy, start_proxy};

/// Dispatch a parsed subcommand
pub async fn execute(command: Commands, config_path: Option<&Path>) -> CliResult<()> {
    match command {
        Commands::Config(args) if args.defaults => execute_config(&ProbeConfig::default(), &args),
        Commands::Config(args) => execute_config(&load_config(config_path)?, &args),
        Commands::Proxy(args) => execute_proxy(load_config(config_path)?, &args).await,
        Commands::Otp(args) => execute_otp(load_config(config_path)?, args).await,
    }
}
