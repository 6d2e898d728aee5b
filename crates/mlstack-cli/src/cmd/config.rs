use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use mlstack_core::config::{Config, ConfigSource, WarnLevel, DEFAULT_CONFIG_FILE};
use mlstack_core::StackError;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { force } => init(config, force, json),
        ConfigSubcommand::Show => show(config, json),
        ConfigSubcommand::Validate => validate(config, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(explicit: Option<&Path>, force: bool, json: bool) -> anyhow::Result<()> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => super::cwd()?.join(DEFAULT_CONFIG_FILE),
    };
    if path.exists() && !force {
        return Err(StackError::ConfigExists(path.display().to_string()).into());
    }

    Config::default()
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({ "path": path }))?;
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(explicit: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (config, source) =
        Config::resolve(explicit, &super::cwd()?).context("failed to load config")?;

    if json {
        let source = match &source {
            ConfigSource::File(p) => p.display().to_string(),
            ConfigSource::Defaults => "defaults".to_string(),
        };
        print_json(&serde_json::json!({
            "source": source,
            "config": config,
        }))?;
    } else {
        match &source {
            ConfigSource::File(p) => println!("# source: {}", p.display()),
            ConfigSource::Defaults => println!("# source: built-in defaults"),
        }
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(explicit: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (config, _) = Config::resolve(explicit, &super::cwd()?).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if Config::has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
