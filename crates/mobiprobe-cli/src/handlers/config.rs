//! Config command handler

use crate::{CliError, CliResult, ConfigArgs};
use mobiprobe::ProbeConfig;
use std::path::Path;

const MASK: &str = "********";

/// Load the YAML file when given, then apply `MOBIPROBE_*` overrides
pub fn load_config(path: Option<&Path>) -> CliResult<ProbeConfig> {
    let config = match path {
        Some(path) => ProbeConfig::from_yaml_file(path)
            .map_err(|e| CliError::config(format!("cannot load {}: {e}", path.display())))?,
        None => ProbeConfig::default(),
    }
    .apply_env();
    config.validate()?;
    Ok(config)
}

/// Copy of `config` with credentials masked
#[must_use]
pub fn redacted(config: &ProbeConfig) -> ProbeConfig {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some(MASK.to_string());
    }
    config
}

/// Print the configuration as YAML
pub fn execute_config(config: &ProbeConfig, args: &ConfigArgs) -> CliResult<()> {
    let shown = if args.show_secrets {
        config.clone()
    } else {
        redacted(config)
    };
    print!("{}", serde_yaml_ng::to_string(&shown)?);
    Ok(())
}
