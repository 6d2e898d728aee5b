use crate::output::{print_json, print_table, Column};
use mlstack_core::prereqs;

pub fn run(json: bool) -> anyhow::Result<()> {
    let checks = prereqs::check_tools();

    if json {
        print_json(&checks)?;
    } else {
        let rows: Vec<Vec<String>> = checks
            .iter()
            .map(|c| {
                vec![
                    c.tool.to_string(),
                    if c.found() { "found" } else { "missing" }.to_string(),
                    c.path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ]
            })
            .collect();
        print_table(
            &[Column::left("TOOL"), Column::left("STATUS"), Column::left("PATH")],
            &rows,
        );
    }

    prereqs::require_tools(&checks)?;
    Ok(())
}
