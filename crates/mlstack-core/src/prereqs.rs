//! Detection of the external command-line tools the installer needs.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Result, StackError};
use crate::invocation::Tool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCheck {
    pub tool: Tool,
    /// Resolved location on `PATH`, `None` when missing.
    pub path: Option<PathBuf>,
}

impl ToolCheck {
    pub fn found(&self) -> bool {
        self.path.is_some()
    }
}

/// Resolve every required tool on `PATH`.
pub fn check_tools() -> Vec<ToolCheck> {
    Tool::all()
        .iter()
        .map(|&tool| ToolCheck {
            tool,
            path: which::which(tool.program()).ok(),
        })
        .collect()
}

/// Fail with one error naming every missing tool.
pub fn require_tools(checks: &[ToolCheck]) -> Result<()> {
    let missing: Vec<String> = checks
        .iter()
        .filter(|c| !c.found())
        .map(|c| c.tool.program().to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StackError::MissingTools(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_tools_covers_every_tool() {
        // Presence depends on the test environment; the shape does not
        let checks = check_tools();
        let tools: Vec<Tool> = checks.iter().map(|c| c.tool).collect();
        assert_eq!(tools, Tool::all());
    }

    #[test]
    fn require_tools_lists_all_missing() {
        let checks = vec![
            ToolCheck {
                tool: Tool::Gcloud,
                path: Some(PathBuf::from("/usr/bin/gcloud")),
            },
            ToolCheck {
                tool: Tool::Kubectl,
                path: None,
            },
            ToolCheck {
                tool: Tool::Helm,
                path: None,
            },
        ];
        let err = require_tools(&checks).unwrap_err();
        assert_eq!(err.to_string(), "missing required tools: kubectl, helm");
    }

    #[test]
    fn require_tools_ok_when_all_found() {
        let checks: Vec<ToolCheck> = Tool::all()
            .iter()
            .map(|&tool| ToolCheck {
                tool,
                path: Some(PathBuf::from(format!("/opt/bin/{tool}"))),
            })
            .collect();
        assert!(require_tools(&checks).is_ok());
    }
}
