use crate::cmd::TargetArgs;
use crate::output::print_json;
use mlstack_core::plan::{Action, Plan, PlanOptions};
use std::path::Path;

pub fn run(
    config: Option<&Path>,
    target: &TargetArgs,
    rebuild_image: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (deployment, config) = super::deployment(config, target)?;
    // Secrets are redacted in every rendering, so no password is needed here
    let plan = Plan::build(
        deployment,
        &config,
        &PlanOptions {
            rebuild_image,
            ..PlanOptions::default()
        },
    );

    if json {
        return print_json(&plan);
    }

    let d = &plan.deployment;
    println!(
        "Plan for '{}' in {} ({}, {})",
        d.target.deployment_name, d.target.project_id, d.target.region, d.target.zone
    );
    println!();
    for (i, step) in plan.steps.iter().enumerate() {
        println!("{:>2}. {}: {}", i + 1, step.id, step.summary);
        if let Some(guard) = &step.guard {
            println!("      check:   {}", guard.query);
        }
        for action in &step.actions {
            match action {
                Action::Run { command } => println!("      run:     {command}"),
                Action::Capture { var, command, .. } => {
                    println!("      capture: {var} <- {command}")
                }
            }
        }
    }

    Ok(())
}
