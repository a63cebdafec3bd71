//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Mobiprobe: resilient mobile app automation toolkit
#[derive(Parser, Debug)]
#[command(name = "mobiprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// YAML configuration file
    #[arg(short, long, global = true, env = "MOBIPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the command proxy in front of a remote automation server
    Proxy(ProxyArgs),

    /// Reserve phone numbers and email addresses and read OTP codes
    Otp(OtpArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the proxy command
#[derive(Args, Debug, Default)]
pub struct ProxyArgs {
    /// Remote automation server URL (overrides the configuration)
    #[arg(long)]
    pub remote_url: Option<String>,

    /// Path prefix stripped from incoming requests
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Arguments for the otp command
#[derive(Args, Debug)]
pub struct OtpArgs {
    /// OTP service URL (overrides the configuration)
    #[arg(long)]
    pub api_url: Option<String>,

    /// OTP operation
    #[command(subcommand)]
    pub command: OtpCommand,
}

/// OTP operations
#[derive(Subcommand, Debug)]
pub enum OtpCommand {
    /// Reserve a phone number
    Phone {
        /// Country calling code, without the plus sign
        #[arg(long, default_value = "1")]
        country_code: String,

        /// Wait for the code right away, then release the number
        #[arg(long)]
        wait: bool,
    },

    /// Reserve an email address
    Email {
        /// Wait for the code right away, then release the address
        #[arg(long)]
        wait: bool,
    },

    /// Poll for the code sent to a reserved target, then release it
    Code(OtpTargetArgs),

    /// Release a reserved target
    Release(OtpTargetArgs),
}

/// A phone number or email address reserved earlier
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct OtpTargetArgs {
    /// Reserved phone number
    #[arg(long)]
    pub phone: Option<String>,

    /// Reserved email address
    #[arg(long)]
    pub email: Option<String>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the effective configuration
    #[arg(long)]
    pub defaults: bool,

    /// Print credentials unmasked
    #[arg(long)]
    pub show_secrets: bool,
}
