mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, install::InstallArgs, TargetArgs};
use mlstack_core::StackError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mlstack",
    about = "Provision Cloud Composer, Cloud SQL, and an MLflow tracking server on Google Cloud",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: mlstack.yaml in the current directory, if present)
    #[arg(long, global = true, env = "MLSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision every resource, skipping those that already exist
    Install(InstallArgs),

    /// Print the steps and commands an install would run
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Show the image build as unconditional
        #[arg(long)]
        rebuild_image: bool,
    },

    /// Report which resources already exist
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print derived names as shell export statements
    Env {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Check that gcloud, gsutil, kubectl, and helm are on PATH
    Check,

    /// Create, show, or validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Install(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let installing = matches!(cli.command, Commands::Install(_));

    let result = match cli.command {
        Commands::Install(args) => cmd::install::run(config, args, cli.json),
        Commands::Plan {
            target,
            rebuild_image,
        } => cmd::plan::run(config, &target, rebuild_image, cli.json),
        Commands::Status { target } => cmd::status::run(config, &target, cli.json),
        Commands::Env { target } => cmd::env::run(config, &target, cli.json),
        Commands::Check => cmd::check::run(cli.json),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        if installing {
            eprintln!("aborting");
        }
        let code = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<StackError>())
            .map(StackError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
