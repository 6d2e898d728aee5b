pub mod check;
pub mod config;
pub mod env;
pub mod install;
pub mod plan;
pub mod status;

use anyhow::Context;
use clap::Args;
use mlstack_core::config::{Config, ConfigSource, WarnLevel};
use mlstack_core::deployment::{
    Deployment, Target, DEFAULT_DEPLOYMENT_NAME, DEFAULT_REGION, DEFAULT_ZONE,
};
use std::path::{Path, PathBuf};

/// Positional arguments shared by every command that targets a deployment.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Google Cloud project id
    pub project_id: String,

    /// Prefix for every resource name
    #[arg(default_value = DEFAULT_DEPLOYMENT_NAME)]
    pub deployment_name: String,

    #[arg(default_value = DEFAULT_REGION)]
    pub region: String,

    /// Must lie inside REGION
    #[arg(default_value = DEFAULT_ZONE)]
    pub zone: String,
}

impl TargetArgs {
    pub fn target(&self) -> mlstack_core::Result<Target> {
        Target::new(
            self.project_id.as_str(),
            self.deployment_name.as_str(),
            self.region.as_str(),
            self.zone.as_str(),
        )
    }
}

pub fn cwd() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("failed to read current directory")
}

/// Resolve the effective config, logging where it came from.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let (config, source) = Config::resolve(explicit, &cwd()?)?;
    match &source {
        ConfigSource::File(path) => tracing::debug!("using config {}", path.display()),
        ConfigSource::Defaults => tracing::debug!("no config file, using defaults"),
    }
    Ok(config)
}

/// Load the config and refuse to continue when it has errors.
pub fn load_valid_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let config = load_config(explicit)?;
    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if Config::has_errors(&warnings) {
        anyhow::bail!("config validation found errors (see `mlstack config validate`)");
    }
    Ok(config)
}

/// Validate `target` and derive every resource name from it.
pub fn deployment(
    explicit: Option<&Path>,
    target: &TargetArgs,
) -> anyhow::Result<(Deployment, Config)> {
    let target = target.target()?;
    let config = load_valid_config(explicit)?;
    Ok((Deployment::derive(target, &config), config))
}
