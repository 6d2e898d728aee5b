use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::Deployment;
use crate::error::Result;
use crate::invocation::Exports;
use crate::provision::StepRecord;

/// Captured values surfaced to the user at the end of a run.
pub const ENDPOINT_VARS: &[&str] = &["AIRFLOW_URI", "MLFLOW_URI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// Machine-readable record of one `install` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub deployment: Deployment,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    pub endpoints: BTreeMap<String, String>,
}

impl RunReport {
    pub fn succeeded(
        deployment: Deployment,
        started_at: DateTime<Utc>,
        steps: Vec<StepRecord>,
        exports: &Exports,
    ) -> Self {
        Self {
            deployment,
            started_at,
            finished_at: Utc::now(),
            outcome: Outcome::Succeeded,
            error: None,
            steps,
            endpoints: endpoints(exports),
        }
    }

    pub fn failed(
        deployment: Deployment,
        started_at: DateTime<Utc>,
        steps: Vec<StepRecord>,
        error: String,
    ) -> Self {
        Self {
            deployment,
            started_at,
            finished_at: Utc::now(),
            outcome: Outcome::Failed,
            error: Some(error),
            steps,
            endpoints: BTreeMap::new(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }
}

/// Endpoint values present in `exports`, keyed by variable name.
pub fn endpoints(exports: &Exports) -> BTreeMap<String, String> {
    ENDPOINT_VARS
        .iter()
        .filter_map(|&var| exports.get(var).map(|v| (var.to_string(), v.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deployment::Target;
    use crate::plan::StepId;
    use crate::provision::StepStatus;
    use tempfile::TempDir;

    fn deployment() -> Deployment {
        Deployment::derive(
            Target::with_defaults("acme-ml-prod").unwrap(),
            &Config::default(),
        )
    }

    #[test]
    fn endpoints_pick_known_vars_only() {
        let mut exports = deployment().exports();
        exports.set("AIRFLOW_URI", "https://abc-tp.appspot.com");
        let found = endpoints(&exports);
        assert_eq!(found.len(), 1);
        assert_eq!(found["AIRFLOW_URI"], "https://abc-tp.appspot.com");
    }

    #[test]
    fn failed_report_written_as_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let report = RunReport::failed(
            deployment(),
            Utc::now(),
            vec![
                StepRecord {
                    id: StepId::SetProject,
                    status: StepStatus::Applied,
                    duration_ms: 812,
                },
                StepRecord {
                    id: StepId::EnableServices,
                    status: StepStatus::Failed,
                    duration_ms: 40,
                },
            ],
            "step 'enable-services' failed".to_string(),
        );
        report.write(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["deployment"]["project_id"], "acme-ml-prod");
        assert_eq!(value["deployment"]["composer_env"], "mlops-af");
        assert_eq!(value["steps"][1]["id"], "enable-services");
        assert_eq!(value["steps"][1]["status"], "failed");
        assert!(value["error"].as_str().unwrap().contains("enable-services"));
    }

    #[test]
    fn succeeded_report_has_no_error_field() {
        let report = RunReport::succeeded(deployment(), Utc::now(), Vec::new(), &Exports::new());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"outcome\":\"succeeded\""));
        assert!(!json.contains("\"error\""));
    }
}
