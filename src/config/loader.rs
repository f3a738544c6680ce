use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use tracing::{debug, info};

use super::profiles::ControllerProfile;
use super::runtime::ControllerConfig;

/// Prefix for environment overrides, e.g. `METACTL__BANDIT__DECAY_RATE=0.98`.
pub const ENV_PREFIX: &str = "METACTL";

/// Load the controller configuration in layers:
/// profile defaults, then an optional TOML file, then environment variables.
pub fn load_config(path: Option<&str>, profile: ControllerProfile) -> Result<ControllerConfig> {
    // .env is optional
    if let Ok(env_path) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_path.display());
    }

    let defaults = Config::try_from(&profile.to_config())
        .context("failed to serialize profile defaults")?;

    let mut builder = Config::builder().add_source(defaults);
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: ControllerConfig = builder
        .build()
        .context("failed to build layered configuration")?
        .try_deserialize()
        .context("failed to deserialize controller configuration")?;

    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join(", ")))?;

    info!(
        "Configuration loaded: profile={}, strategies={:?}",
        config.profile.name(),
        config.strategies
    );
    Ok(config)
}

/// Render a configuration as TOML, e.g. for `metactl show-config`.
pub fn render_toml(config: &ControllerConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
