//! Mobiprobe CLI
//!
//! ## Usage
//!
//! ```bash
//! mobiprobe proxy --remote-url https://hub.example.com/wd/hub   # Run the command proxy
//! mobiprobe otp phone --country-code 44 --wait                  # Reserve a number, print its code
//! mobiprobe otp release --email qa@example.com                  # Release a reservation
//! mobiprobe config --config run.yaml                            # Show effective configuration
//! ```

use clap::Parser;
use console::style;
use mobiprobe_cli::{handlers, logging, Cli, CliResult};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("Error:").red().bold().for_stderr());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(handlers::execute(cli.command, cli.config.as_deref()))
}
