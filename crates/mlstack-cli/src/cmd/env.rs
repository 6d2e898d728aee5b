use crate::cmd::TargetArgs;
use crate::output::{print_json, shell_quote};
use std::path::Path;

/// Print the derived names so they can be `eval`ed into a shell.
pub fn run(config: Option<&Path>, target: &TargetArgs, json: bool) -> anyhow::Result<()> {
    let (deployment, _) = super::deployment(config, target)?;
    let exports = deployment.exports();

    if json {
        return print_json(&exports);
    }
    for (name, value) in exports.iter() {
        println!("export {name}={}", shell_quote(value));
    }
    Ok(())
}
