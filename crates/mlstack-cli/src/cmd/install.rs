use crate::cmd::TargetArgs;
use crate::output::{print_json, print_table, Column};
use anyhow::Context;
use chrono::Utc;
use clap::Args;
use mlstack_core::{
    invocation::Exports,
    password::SqlPassword,
    plan::{Plan, PlanOptions, StepId},
    prereqs,
    provision::{PlannedCommand, Provisioner, StepRecord, StepStatus},
    report::RunReport,
    runner::{OutputMode, SystemRunner},
};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct InstallArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Step id to leave out (repeatable)
    #[arg(long = "skip", value_name = "ID")]
    pub skip: Vec<StepId>,

    /// Build the MLflow image even if the tag already exists
    #[arg(long)]
    pub rebuild_image: bool,

    /// Password for the Cloud SQL user (generated when omitted)
    #[arg(long, env = "MLSTACK_SQL_PASSWORD", hide_env_values = true)]
    pub sql_password: Option<String>,

    /// Print the commands without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Write a JSON run report to this path, on success or failure
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

pub fn run(config: Option<&Path>, args: InstallArgs, json: bool) -> anyhow::Result<()> {
    let (deployment, config) = super::deployment(config, &args.target)?;
    let password = SqlPassword::resolve(args.sql_password);
    password.check_skips(&args.skip)?;
    let plan = Plan::build(
        deployment,
        &config,
        &PlanOptions {
            rebuild_image: args.rebuild_image,
            sql_password: password.value.clone(),
        },
    );
    // Tool output must not interleave with the JSON report on stdout
    let action_output = if json {
        OutputMode::Stderr
    } else {
        OutputMode::Inherit
    };
    let mut provisioner = Provisioner::new(SystemRunner::new())
        .skip(args.skip)
        .action_output(action_output);

    if args.dry_run {
        return print_dry_run(&provisioner.dry_run(&plan), json);
    }

    prereqs::require_tools(&prereqs::check_tools())?;

    let started_at = Utc::now();
    let mut records = Vec::new();
    let result = provisioner.install(&plan, &mut records);

    let exports = match result {
        Ok(exports) => exports,
        Err(e) => {
            if let Some(path) = &args.report {
                let report = RunReport::failed(
                    plan.deployment.clone(),
                    started_at,
                    records.clone(),
                    e.to_string(),
                );
                if let Err(write_err) = report.write(path) {
                    tracing::warn!("failed to write run report {}: {write_err}", path.display());
                }
            }
            // The instance password has already been changed
            if password.generated && password_was_set(&records) {
                announce_password(&password.value, json);
            }
            return Err(e.into());
        }
    };

    let report = RunReport::succeeded(plan.deployment.clone(), started_at, records, &exports);
    if let Some(path) = &args.report {
        report
            .write(path)
            .with_context(|| format!("failed to write run report {}", path.display()))?;
    }

    if json {
        print_json(&report)?;
    } else {
        print_summary(&report, &exports);
    }
    if password.generated && password_was_set(&report.steps) {
        announce_password(&password.value, json);
    }

    Ok(())
}

fn password_was_set(records: &[StepRecord]) -> bool {
    records
        .iter()
        .any(|r| r.id == StepId::SqlUser && r.status == StepStatus::Created)
}

fn announce_password(value: &str, json: bool) {
    let line = format!("Generated SQL password (shown once): {value}");
    if json {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

fn print_dry_run(commands: &[PlannedCommand], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&commands);
    }
    let rows: Vec<Vec<String>> = commands
        .iter()
        .map(|c| {
            vec![
                c.step.to_string(),
                c.kind.as_str().to_string(),
                c.command.clone(),
            ]
        })
        .collect();
    print_table(
        &[Column::left("STEP"), Column::left("KIND"), Column::left("COMMAND")],
        &rows,
    );
    Ok(())
}

fn print_summary(report: &RunReport, exports: &Exports) {
    let rows: Vec<Vec<String>> = report
        .steps
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.status.as_str().to_string(),
                format!("{:.1}s", r.duration_ms as f64 / 1000.0),
            ]
        })
        .collect();
    print_table(
        &[Column::left("STEP"), Column::left("STATUS"), Column::right("TIME")],
        &rows,
    );
    println!();

    let d = &report.deployment;
    println!(
        "Deployment '{}' is ready in project {}.",
        d.target.deployment_name, d.target.project_id
    );
    println!("  Airflow: {}", exports.get("AIRFLOW_URI").unwrap_or("(unavailable)"));
    match exports.get("MLFLOW_URI") {
        Some(uri) => println!("  MLflow:  https://{uri}"),
        None => println!("  MLflow:  (unavailable)"),
    }
}
