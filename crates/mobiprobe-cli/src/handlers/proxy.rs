//! Proxy command handler

use crate::{CliResult, ProxyArgs};
use console::style;
use mobiprobe::{CommandProxy, ProbeConfig, ProxyHandle};
use tracing::info;

/// Overlay command-line overrides on the configuration
#[must_use]
pub fn apply_proxy_args(mut config: ProbeConfig, args: &ProxyArgs) -> ProbeConfig {
    if let Some(url) = &args.remote_url {
        config.remote_url.clone_from(url);
    }
    if let Some(prefix) = &args.prefix {
        config.path_prefix.clone_from(prefix);
    }
    config
}

/// Start the proxy for `config` with overrides applied
pub async fn start_proxy(config: ProbeConfig, args: &ProxyArgs) -> CliResult<ProxyHandle> {
    let config = apply_proxy_args(config, args);
    config.validate()?;
    let handle = CommandProxy::from_config(&config).start().await?;
    info!(upstream = %config.remote_url, url = %handle.url(), "proxy ready");
    Ok(handle)
}

/// Run the proxy until interrupted
pub async fn execute_proxy(config: ProbeConfig, args: &ProxyArgs) -> CliResult<()> {
    let handle = start_proxy(config, args).await?;
    println!("{}", handle.url());
    eprintln!(
        "{} Command proxy listening on {} (Ctrl-C to stop)",
        style("✓").green().for_stderr(),
        style(handle.url()).bold().for_stderr()
    );

    tokio::signal::ctrl_c().await?;

    let session = handle.session();
    handle.stop().await?;
    eprintln!(
        "Stopped. Session: {}, command counter: {}",
        session.session_id().as_deref().unwrap_or("none"),
        session.counter()
    );
    Ok(())
}
