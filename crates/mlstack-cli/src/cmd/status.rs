use crate::cmd::TargetArgs;
use crate::output::{print_json, print_table, Column};
use mlstack_core::{
    plan::{Plan, PlanOptions},
    provision::Provisioner,
    runner::SystemRunner,
};
use std::path::Path;

pub fn run(config: Option<&Path>, target: &TargetArgs, json: bool) -> anyhow::Result<()> {
    let (deployment, config) = super::deployment(config, target)?;
    let plan = Plan::build(deployment, &config, &PlanOptions::default());
    let entries = Provisioner::new(SystemRunner::new()).status(&plan);

    if json {
        let value = serde_json::json!({
            "deployment": plan.deployment,
            "steps": entries,
        });
        return print_json(&value);
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.presence.as_str().to_string(),
                e.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &[Column::left("STEP"), Column::left("PRESENCE"), Column::left("DETAIL")],
        &rows,
    );
    Ok(())
}
