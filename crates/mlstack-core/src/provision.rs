//! Walks a [`Plan`] against a [`CommandRunner`].
//!
//! # Install semantics
//! - Steps run strictly in plan order.
//! - A guarded step whose guard matches is recorded as `exists` and its
//!   actions are not run.
//! - Any external command that exits non-zero (guard, capture, or action)
//!   aborts the run with [`StackError::StepFailed`]; nothing after it runs.
//! - Skipped step ids are recorded as `skipped` and never touch the runner.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, StackError};
use crate::invocation::{Exports, Invocation};
use crate::plan::{Action, Plan, Step, StepId};
use crate::runner::{CommandOutput, CommandRunner, OutputMode};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Guard matched; nothing was created.
    Exists,
    /// Guard did not match; the resource was created.
    Created,
    /// Unguarded step ran.
    Applied,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Exists => "exists",
            StepStatus::Created => "created",
            StepStatus::Applied => "applied",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub id: StepId,
    pub status: StepStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
    /// Step has no guard; there is nothing to look up.
    #[serde(rename = "n/a")]
    NotApplicable,
    /// The guard query itself failed.
    Unknown,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Present => "present",
            Presence::Absent => "absent",
            Presence::NotApplicable => "n/a",
            Presence::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub id: StepId,
    pub summary: String,
    pub presence: Presence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Check,
    Run,
    Capture,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Check => "check",
            CommandKind::Run => "run",
            CommandKind::Capture => "capture",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCommand {
    pub step: StepId,
    pub kind: CommandKind,
    pub command: String,
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

pub struct Provisioner<R> {
    runner: R,
    skip: BTreeSet<StepId>,
    action_output: OutputMode,
}

impl<R: CommandRunner> Provisioner<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            skip: BTreeSet::new(),
            action_output: OutputMode::Inherit,
        }
    }

    /// Where the stdout of create actions goes. Guards and captures always
    /// capture.
    pub fn action_output(mut self, mode: OutputMode) -> Self {
        self.action_output = mode;
        self
    }

    pub fn skip(mut self, ids: impl IntoIterator<Item = StepId>) -> Self {
        self.skip.extend(ids);
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run the plan. Every step attempted is appended to `records`, including
    /// the failing one, so callers can report partial progress.
    ///
    /// Returns the final export set (derived names plus captured values).
    pub fn install(&mut self, plan: &Plan, records: &mut Vec<StepRecord>) -> Result<Exports> {
        let mut exports = plan.deployment.exports();
        let total = plan.steps.len();

        for (i, step) in plan.steps.iter().enumerate() {
            let n = i + 1;
            if self.skip.contains(&step.id) {
                info!("[{n}/{total}] {}: skipped", step.id);
                records.push(StepRecord {
                    id: step.id,
                    status: StepStatus::Skipped,
                    duration_ms: 0,
                });
                continue;
            }

            info!("[{n}/{total}] {}: {}", step.id, step.summary);
            let started = Instant::now();
            let result = self.run_step(step, &mut exports);
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(status) => {
                    if status == StepStatus::Exists {
                        info!("[{n}/{total}] {}: already exists, skipping", step.id);
                    }
                    records.push(StepRecord {
                        id: step.id,
                        status,
                        duration_ms,
                    });
                }
                Err(e) => {
                    records.push(StepRecord {
                        id: step.id,
                        status: StepStatus::Failed,
                        duration_ms,
                    });
                    return Err(e);
                }
            }
        }

        Ok(exports)
    }

    fn run_step(&mut self, step: &Step, exports: &mut Exports) -> Result<StepStatus> {
        if let Some(guard) = &step.guard {
            let out = self.checked(step.id, &guard.query, exports, OutputMode::Capture)?;
            if guard.matcher.matches(&out.stdout) {
                return Ok(StepStatus::Exists);
            }
        }

        for action in &step.actions {
            match action {
                Action::Run { command } => {
                    let mode = self.action_output;
                    self.checked(step.id, command, exports, mode)?;
                }
                Action::Capture {
                    var,
                    command,
                    extract,
                    required,
                } => {
                    let out = self.checked(step.id, command, exports, OutputMode::Capture)?;
                    let value = extract.apply(&out.stdout);
                    if value.is_empty() {
                        if *required {
                            return Err(StackError::EmptyCapture {
                                step: step.id.to_string(),
                                var: var.clone(),
                                command: command.to_string(),
                            });
                        }
                        warn!("{}: {var} is empty, leaving it unset", step.id);
                        continue;
                    }
                    exports.set(var.clone(), value);
                }
            }
        }

        Ok(if step.guard.is_some() {
            StepStatus::Created
        } else {
            StepStatus::Applied
        })
    }

    /// Run one command; a non-zero exit becomes a `StepFailed` error.
    fn checked(
        &mut self,
        step: StepId,
        command: &Invocation,
        exports: &Exports,
        mode: OutputMode,
    ) -> Result<CommandOutput> {
        let out = self.runner.run(command, exports, mode)?;
        if !out.success() {
            return Err(StackError::StepFailed {
                step: step.to_string(),
                command: command.to_string(),
                exit_code: out.exit_code(),
            });
        }
        Ok(out)
    }

    /// Evaluate guards only. Never aborts: a failing query is `unknown`.
    pub fn status(&mut self, plan: &Plan) -> Vec<StatusEntry> {
        let exports = plan.deployment.exports();
        plan.steps
            .iter()
            .map(|step| {
                let (presence, detail) = match &step.guard {
                    None => (Presence::NotApplicable, None),
                    Some(guard) => {
                        match self.runner.run(&guard.query, &exports, OutputMode::Capture) {
                            Ok(out) if out.success() => {
                                if guard.matcher.matches(&out.stdout) {
                                    (Presence::Present, None)
                                } else {
                                    (Presence::Absent, None)
                                }
                            }
                            Ok(out) => (
                                Presence::Unknown,
                                Some(format!("query exited with status {}", out.exit_code())),
                            ),
                            Err(e) => (Presence::Unknown, Some(e.to_string())),
                        }
                    }
                };
                StatusEntry {
                    id: step.id,
                    summary: step.summary.clone(),
                    presence,
                    detail,
                }
            })
            .collect()
    }

    /// Every command `install` could run, in order, without running any.
    pub fn dry_run(&self, plan: &Plan) -> Vec<PlannedCommand> {
        let mut out = Vec::new();
        for step in plan.steps.iter().filter(|s| !self.skip.contains(&s.id)) {
            if let Some(guard) = &step.guard {
                out.push(PlannedCommand {
                    step: step.id,
                    kind: CommandKind::Check,
                    command: guard.query.to_string(),
                });
            }
            for action in &step.actions {
                let kind = match action {
                    Action::Run { .. } => CommandKind::Run,
                    Action::Capture { .. } => CommandKind::Capture,
                };
                out.push(PlannedCommand {
                    step: step.id,
                    kind,
                    command: action.command().to_string(),
                });
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deployment::{Deployment, Target};
    use crate::password::SqlPassword;
    use crate::plan::PlanOptions;
    use crate::runner::testing::ScriptedRunner;

    const CLUSTER_PATH: &str = "projects/acme-ml-prod/zones/us-central1-a/clusters/us-central1-mlops-af-gke\n";

    fn plan() -> Plan {
        let config = Config::default();
        let d = Deployment::derive(Target::with_defaults("acme-ml-prod").unwrap(), &config);
        Plan::build(
            d,
            &config,
            &PlanOptions {
                rebuild_image: false,
                sql_password: "pw".to_string(),
            },
        )
    }

    /// A runner where nothing exists yet and the Composer env resolves to a cluster.
    fn fresh_project() -> ScriptedRunner {
        ScriptedRunner::new().respond(
            "gcloud composer environments describe mlops-af --location=us-central1 --format=value(config.gkeCluster)",
            0,
            CLUSTER_PATH,
        )
    }

    fn statuses(records: &[StepRecord]) -> Vec<(StepId, StepStatus)> {
        records.iter().map(|r| (r.id, r.status)).collect()
    }

    #[test]
    fn fresh_install_creates_everything_in_order() {
        let mut p = Provisioner::new(fresh_project());
        let mut records = Vec::new();
        let exports = p.install(&plan(), &mut records).unwrap();

        assert_eq!(
            statuses(&records),
            vec![
                (StepId::SetProject, StepStatus::Applied),
                (StepId::EnableServices, StepStatus::Applied),
                (StepId::ComposerEnvironment, StepStatus::Created),
                (StepId::GkeCredentials, StepStatus::Applied),
                (StepId::SqlInstance, StepStatus::Created),
                (StepId::SqlUser, StepStatus::Created),
                (StepId::SqlDatabase, StepStatus::Created),
                (StepId::ArtifactBucket, StepStatus::Created),
                (StepId::MlflowImage, StepStatus::Created),
                (StepId::MlflowNamespace, StepStatus::Created),
                (StepId::MlflowRelease, StepStatus::Created),
                (StepId::Endpoints, StepStatus::Applied),
            ]
        );
        assert_eq!(exports.get("GKE_CLUSTER"), Some("us-central1-mlops-af-gke"));

        let calls = &p.runner().calls;
        assert_eq!(calls[0], "gcloud config set project acme-ml-prod");
        let create_composer = calls
            .iter()
            .position(|c| c.starts_with("gcloud composer environments create"))
            .unwrap();
        let create_sql = calls
            .iter()
            .position(|c| c.starts_with("gcloud sql instances create"))
            .unwrap();
        let helm_install = calls.iter().position(|c| c.starts_with("helm install")).unwrap();
        assert!(create_composer < create_sql && create_sql < helm_install);
    }

    #[test]
    fn captured_cluster_is_expanded_into_get_credentials() {
        let mut p = Provisioner::new(fresh_project());
        p.install(&plan(), &mut Vec::new()).unwrap();

        let runner = p.runner();
        let idx = runner
            .calls
            .iter()
            .position(|c| c.starts_with("gcloud container clusters get-credentials"))
            .unwrap();
        assert_eq!(runner.expanded[idx][3], "us-central1-mlops-af-gke");
    }

    #[test]
    fn existing_resources_are_skipped() {
        let runner = fresh_project()
            .respond("gcloud composer environments list", 0, "mlops-af\n")
            .respond("gcloud sql instances list", 0, "mlops-sql\n")
            .respond("gcloud sql databases list", 0, "mlflow\n")
            .respond("gsutil ls -p", 0, "gs://acme-ml-prod-mlops-artifacts/\n")
            .respond("gcloud container images list-tags", 0, "sha256:abc\n")
            .respond("kubectl get namespace", 0, "namespace/mlflow\n")
            .respond("helm list", 0, "mlops-mlflow\n");
        let mut p = Provisioner::new(runner);
        let mut records = Vec::new();
        p.install(&plan(), &mut records).unwrap();

        for id in [
            StepId::ComposerEnvironment,
            StepId::SqlInstance,
            StepId::SqlUser,
            StepId::SqlDatabase,
            StepId::ArtifactBucket,
            StepId::MlflowImage,
            StepId::MlflowNamespace,
            StepId::MlflowRelease,
        ] {
            let r = records.iter().find(|r| r.id == id).unwrap();
            assert_eq!(r.status, StepStatus::Exists, "{id}");
        }

        let runner = p.runner();
        assert!(!runner.called("gcloud composer environments create"));
        assert!(!runner.called("gcloud sql instances create"));
        assert!(!runner.called("gsutil mb"));
        assert!(!runner.called("gcloud builds submit"));
        assert!(!runner.called("helm install"));
        assert!(!runner.called("gcloud sql users set-password"));
    }

    #[test]
    fn rerun_with_fresh_password_leaves_deployed_release_alone() {
        let password = SqlPassword::resolve(None);
        assert!(password.generated);
        let config = Config::default();
        let d = Deployment::derive(Target::with_defaults("acme-ml-prod").unwrap(), &config);
        let plan = Plan::build(
            d,
            &config,
            &PlanOptions {
                rebuild_image: false,
                sql_password: password.value.clone(),
            },
        );

        let runner = fresh_project().respond("helm list", 0, "mlops-mlflow\n");
        let mut p = Provisioner::new(runner);
        let mut records = Vec::new();
        p.install(&plan, &mut records).unwrap();

        let status = |id: StepId| records.iter().find(|r| r.id == id).unwrap().status;
        assert_eq!(status(StepId::SqlUser), StepStatus::Exists);
        assert_eq!(status(StepId::MlflowRelease), StepStatus::Exists);
        assert!(!p.runner().called("gcloud sql users set-password"));
        assert!(!p.runner().called("helm install"));
        assert!(p
            .runner()
            .expanded
            .iter()
            .all(|args| !args.iter().any(|a| a.contains(&password.value))));
    }

    #[test]
    fn password_reset_precedes_first_release_install() {
        let mut p = Provisioner::new(fresh_project());
        p.install(&plan(), &mut Vec::new()).unwrap();
        let calls = &p.runner().calls;
        let reset = calls
            .iter()
            .position(|c| c.starts_with("gcloud sql users set-password root"))
            .unwrap();
        let install = calls.iter().position(|c| c.starts_with("helm install")).unwrap();
        assert!(reset < install);
    }

    #[test]
    fn empty_services_step_runs_nothing() {
        let mut config = Config::default();
        config.services.clear();
        let d = Deployment::derive(Target::with_defaults("acme-ml-prod").unwrap(), &config);
        let plan = Plan::build(d, &config, &PlanOptions::default());

        let mut p = Provisioner::new(fresh_project());
        let mut records = Vec::new();
        p.install(&plan, &mut records).unwrap();

        assert_eq!(records[1].id, StepId::EnableServices);
        assert_eq!(records[1].status, StepStatus::Applied);
        assert!(!p.runner().called("gcloud services"));
    }

    #[test]
    fn bucket_guard_needs_exact_bucket() {
        let runner = fresh_project().respond(
            "gsutil ls -p",
            0,
            "gs://acme-ml-prod-mlops-artifacts-backup/\n",
        );
        let mut p = Provisioner::new(runner);
        p.install(&plan(), &mut Vec::new()).unwrap();
        assert!(p.runner().called("gsutil mb -p acme-ml-prod -l us-central1 gs://acme-ml-prod-mlops-artifacts"));
    }

    #[test]
    fn failing_command_aborts_with_its_exit_code() {
        let runner = fresh_project().respond("gcloud sql instances create", 3, "");
        let mut p = Provisioner::new(runner);
        let mut records = Vec::new();
        let err = p.install(&plan(), &mut records).unwrap_err();

        match &err {
            StackError::StepFailed {
                step,
                command,
                exit_code,
            } => {
                assert_eq!(step, "sql-instance");
                assert!(command.starts_with("gcloud sql instances create mlops-sql"));
                assert_eq!(*exit_code, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 3);

        let last = records.last().unwrap();
        assert_eq!((last.id, last.status), (StepId::SqlInstance, StepStatus::Failed));
        // Nothing after the failing command ran
        assert!(!p.runner().called("gcloud sql users set-password"));
        assert!(!p.runner().called("helm"));
    }

    #[test]
    fn failing_guard_query_aborts() {
        let runner = fresh_project().respond("gcloud composer environments list", 2, "");
        let mut p = Provisioner::new(runner);
        let err = p.install(&plan(), &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            StackError::StepFailed { ref step, exit_code: 2, .. } if step == "composer-environment"
        ));
        assert!(!p.runner().called("gcloud composer environments create"));
    }

    #[test]
    fn signal_reports_exit_code_1() {
        let runner = fresh_project().signal("gcloud builds submit");
        let mut p = Provisioner::new(runner);
        let err = p.install(&plan(), &mut Vec::new()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(matches!(err, StackError::StepFailed { ref step, .. } if step == "mlflow-image"));
    }

    #[test]
    fn missing_tool_aborts_with_127() {
        let runner = fresh_project().unspawnable("helm");
        let mut p = Provisioner::new(runner);
        let mut records = Vec::new();
        let err = p.install(&plan(), &mut records).unwrap_err();
        assert_eq!(err.exit_code(), 127);
        assert_eq!(records.last().unwrap().id, StepId::MlflowRelease);
    }

    #[test]
    fn empty_required_capture_aborts() {
        let mut p = Provisioner::new(ScriptedRunner::new());
        let err = p.install(&plan(), &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            StackError::EmptyCapture { ref var, .. } if var == "GKE_CLUSTER"
        ));
        assert!(!p.runner().called("gcloud container clusters get-credentials"));
    }

    #[test]
    fn optional_endpoint_capture_may_be_empty() {
        let runner = fresh_project().respond(
            "gcloud composer environments describe mlops-af --location=us-central1 --format=value(config.airflowUri)",
            0,
            "https://abc-tp.appspot.com\n",
        );
        let mut p = Provisioner::new(runner);
        let exports = p.install(&plan(), &mut Vec::new()).unwrap();
        assert_eq!(exports.get("AIRFLOW_URI"), Some("https://abc-tp.appspot.com"));
        assert_eq!(exports.get("MLFLOW_URI"), None);
    }

    #[test]
    fn skipped_steps_never_run() {
        let mut p = Provisioner::new(fresh_project())
            .skip([StepId::EnableServices, StepId::MlflowImage]);
        let mut records = Vec::new();
        p.install(&plan(), &mut records).unwrap();

        assert!(!p.runner().called("gcloud services enable"));
        assert!(!p.runner().called("gcloud builds submit"));
        assert!(!p.runner().called("gcloud container images list-tags"));
        let skipped: Vec<StepId> = records
            .iter()
            .filter(|r| r.status == StepStatus::Skipped)
            .map(|r| r.id)
            .collect();
        assert_eq!(skipped, vec![StepId::EnableServices, StepId::MlflowImage]);
        assert_eq!(records.len(), StepId::all().len());
    }

    #[test]
    fn create_actions_stream_and_queries_capture() {
        let mut p = Provisioner::new(fresh_project());
        p.install(&plan(), &mut Vec::new()).unwrap();
        let runner = p.runner();
        for (call, mode) in runner.calls.iter().zip(&runner.modes) {
            if call.starts_with("gcloud sql instances list") {
                assert_eq!(*mode, OutputMode::Capture);
            }
            if call.starts_with("gcloud sql instances create") {
                assert_eq!(*mode, OutputMode::Inherit);
            }
        }
    }

    #[test]
    fn create_actions_can_stream_to_stderr() {
        let mut p = Provisioner::new(fresh_project()).action_output(OutputMode::Stderr);
        p.install(&plan(), &mut Vec::new()).unwrap();
        let runner = p.runner();
        for (call, mode) in runner.calls.iter().zip(&runner.modes) {
            if call.starts_with("helm install") || call.starts_with("gcloud sql instances create") {
                assert_eq!(*mode, OutputMode::Stderr, "{call}");
            }
            if call.starts_with("helm list") {
                assert_eq!(*mode, OutputMode::Capture, "{call}");
            }
        }
    }

    #[test]
    fn not_applicable_serializes_as_na() {
        assert_eq!(
            serde_json::to_string(&Presence::NotApplicable).unwrap(),
            "\"n/a\""
        );
        assert_eq!(serde_json::to_string(&Presence::Absent).unwrap(), "\"absent\"");
    }

    #[test]
    fn status_reports_presence() {
        let runner = ScriptedRunner::new()
            .respond("gcloud composer environments list", 0, "mlops-af\n")
            .respond("gcloud sql instances list", 1, "")
            .unspawnable("kubectl");
        let mut p = Provisioner::new(runner);
        let entries = p.status(&plan());
        let by_id = |id: StepId| entries.iter().find(|e| e.id == id).unwrap();

        assert_eq!(by_id(StepId::ComposerEnvironment).presence, Presence::Present);
        assert_eq!(by_id(StepId::SqlInstance).presence, Presence::Unknown);
        assert_eq!(
            by_id(StepId::SqlInstance).detail.as_deref(),
            Some("query exited with status 1")
        );
        assert_eq!(by_id(StepId::SqlDatabase).presence, Presence::Absent);
        assert_eq!(by_id(StepId::MlflowNamespace).presence, Presence::Unknown);
        assert_eq!(by_id(StepId::SetProject).presence, Presence::NotApplicable);

        // Status only ever runs guard queries
        assert!(p.runner().calls.iter().all(|c| !c.contains(" create ")));
        assert!(!p.runner().called("gcloud config set project"));
    }

    #[test]
    fn dry_run_lists_commands_without_running() {
        let p = Provisioner::new(ScriptedRunner::new()).skip([StepId::SetProject]);
        let commands = p.dry_run(&plan());
        assert!(p.runner().calls.is_empty());
        assert!(commands.iter().all(|c| c.step != StepId::SetProject));
        assert_eq!(commands[0].step, StepId::EnableServices);

        let composer: Vec<&PlannedCommand> = commands
            .iter()
            .filter(|c| c.step == StepId::ComposerEnvironment)
            .collect();
        assert_eq!(composer[0].kind, CommandKind::Check);
        assert_eq!(composer[1].kind, CommandKind::Run);
        assert!(commands.iter().all(|c| !c.command.contains("--password=pw")));
    }
}
