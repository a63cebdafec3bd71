//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Filter directive: an explicit flag wins, then `RUST_LOG`, then `info`
#[must_use]
pub fn filter_directive(verbose: u8, quiet: bool, env: Option<&str>) -> String {
    match verbose {
        0 if quiet => "warn",
        0 => env.filter(|value| !value.trim().is_empty()).unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    }
    .to_string()
}

/// Install the global subscriber writing to stderr
pub fn init(verbose: u8, quiet: bool) {
    let env = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::new(filter_directive(verbose, quiet, env.as_deref()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .try_init();
}
