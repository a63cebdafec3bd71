//! Mobiprobe CLI library
//!
//! Runs the command proxy standalone and drives the OTP service from a shell.

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod error;
pub mod handlers;
pub mod logging;

pub use commands::{
    Cli, Commands, ConfigArgs, OtpArgs, OtpCommand, OtpTargetArgs, ProxyArgs,
};
pub use error::{CliError, CliResult};
