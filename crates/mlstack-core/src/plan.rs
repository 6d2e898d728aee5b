//! The fixed provisioning sequence.
//!
//! A [`Plan`] is pure data: which commands run, in which order, and which
//! existence query guards each step. Building it performs no IO, so the
//! same plan backs `plan`, `status`, `install --dry-run` and `install`.

use crate::config::Config;
use crate::deployment::Deployment;
use crate::error::StackError;
use crate::invocation::Invocation;
use serde::{Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
    SetProject,
    EnableServices,
    ComposerEnvironment,
    GkeCredentials,
    SqlInstance,
    SqlUser,
    SqlDatabase,
    ArtifactBucket,
    MlflowImage,
    MlflowNamespace,
    MlflowRelease,
    Endpoints,
}

impl StepId {
    pub fn all() -> &'static [StepId] {
        &[
            StepId::SetProject,
            StepId::EnableServices,
            StepId::ComposerEnvironment,
            StepId::GkeCredentials,
            StepId::SqlInstance,
            StepId::SqlUser,
            StepId::SqlDatabase,
            StepId::ArtifactBucket,
            StepId::MlflowImage,
            StepId::MlflowNamespace,
            StepId::MlflowRelease,
            StepId::Endpoints,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::SetProject => "set-project",
            StepId::EnableServices => "enable-services",
            StepId::ComposerEnvironment => "composer-environment",
            StepId::GkeCredentials => "gke-credentials",
            StepId::SqlInstance => "sql-instance",
            StepId::SqlUser => "sql-user",
            StepId::SqlDatabase => "sql-database",
            StepId::ArtifactBucket => "artifact-bucket",
            StepId::MlflowImage => "mlflow-image",
            StepId::MlflowNamespace => "mlflow-namespace",
            StepId::MlflowRelease => "mlflow-release",
            StepId::Endpoints => "endpoints",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepId {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::all()
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| StackError::UnknownStep(s.to_string()))
    }
}

impl Serialize for StepId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Guard / Action / Step
// ---------------------------------------------------------------------------

/// How a guard's stdout is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    /// The resource exists when the query prints anything.
    NonEmpty,
    /// The resource exists when some output line equals this value.
    Line(String),
}

impl Matcher {
    pub fn matches(&self, stdout: &str) -> bool {
        match self {
            Matcher::NonEmpty => !stdout.trim().is_empty(),
            Matcher::Line(want) => stdout.lines().any(|l| l.trim() == want),
        }
    }
}

/// Existence query attached to a step. A match skips the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guard {
    pub query: Invocation,
    pub matcher: Matcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Extract {
    Trimmed,
    /// Keep what follows the last `/` (resource paths like `projects/p/zones/z/clusters/c`).
    LastPathSegment,
}

impl Extract {
    pub fn apply(self, stdout: &str) -> String {
        let trimmed = stdout.trim();
        match self {
            Extract::Trimmed => trimmed.to_string(),
            Extract::LastPathSegment => trimmed
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Run {
        command: Invocation,
    },
    /// Run `command` and export its output as `var` for later commands.
    Capture {
        var: String,
        command: Invocation,
        extract: Extract,
        /// An empty value aborts the run when set; otherwise it is left unset.
        required: bool,
    },
}

impl Action {
    pub fn command(&self) -> &Invocation {
        match self {
            Action::Run { command } | Action::Capture { command, .. } => command,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
}

impl Step {
    fn new(id: StepId, summary: impl Into<String>) -> Self {
        Self {
            id,
            summary: summary.into(),
            guard: None,
            actions: Vec::new(),
        }
    }

    fn guard(mut self, query: Invocation, matcher: Matcher) -> Self {
        self.guard = Some(Guard { query, matcher });
        self
    }

    fn run(mut self, command: Invocation) -> Self {
        self.actions.push(Action::Run { command });
        self
    }

    fn capture(mut self, var: &str, command: Invocation, extract: Extract, required: bool) -> Self {
        self.actions.push(Action::Capture {
            var: var.to_string(),
            command,
            extract,
            required,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Build the MLflow image even when the tag already exists.
    pub rebuild_image: bool,
    pub sql_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub deployment: Deployment,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn build(deployment: Deployment, config: &Config, opts: &PlanOptions) -> Self {
        let d = &deployment;
        let t = &d.target;
        let composer = &config.composer;
        let sql = &config.sql;
        let mlflow = &config.mlflow;
        let project = t.project_id.as_str();

        // Every gcloud call names the project so queries never read the
        // caller's active gcloud configuration.
        let pinned = |inv: Invocation| inv.flag("project", project);

        let release_query = Invocation::helm()
            .arg("list")
            .flag("namespace", d.namespace.as_str())
            .flag("filter", format!("^{}$", d.release))
            .arg("--short");

        let mut steps = Vec::with_capacity(StepId::all().len());

        steps.push(
            Step::new(StepId::SetProject, format!("Set active project to {project}"))
                .run(gcloud(&["config", "set", "project", project])),
        );

        let mut services = Step::new(
            StepId::EnableServices,
            "Enable required Google Cloud services",
        );
        if !config.services.is_empty() {
            services = services.run(pinned(
                gcloud(&["services", "enable"]).args(config.services.iter().cloned()),
            ));
        }
        steps.push(services);

        steps.push(
            Step::new(
                StepId::ComposerEnvironment,
                format!("Create Composer environment {}", d.composer_env),
            )
            .guard(
                pinned(
                    gcloud(&["composer", "environments", "list"])
                        .flag("locations", t.region.as_str())
                        .flag("filter", format!("name~{}", d.composer_env))
                        .flag("format", "value(name)"),
                ),
                Matcher::NonEmpty,
            )
            .run(pinned(
                gcloud(&["composer", "environments", "create", d.composer_env.as_str()])
                    .flag("location", t.region.as_str())
                    .flag("zone", t.zone.as_str())
                    .flag("machine-type", composer.machine_type.as_str())
                    .flag("node-count", composer.node_count)
                    .flag("disk-size", format!("{}GB", composer.disk_size_gb))
                    .flag("image-version", composer.image_version.as_str())
                    .flag("python-version", composer.python_version.as_str()),
            )),
        );

        steps.push(
            Step::new(
                StepId::GkeCredentials,
                "Fetch credentials for the Composer GKE cluster",
            )
            .capture(
                "GKE_CLUSTER",
                pinned(
                    gcloud(&["composer", "environments", "describe", d.composer_env.as_str()])
                        .flag("location", t.region.as_str())
                        .flag("format", "value(config.gkeCluster)"),
                ),
                Extract::LastPathSegment,
                true,
            )
            .run(pinned(
                gcloud(&["container", "clusters", "get-credentials", "${GKE_CLUSTER}"])
                    .flag("zone", t.zone.as_str()),
            )),
        );

        steps.push(
            Step::new(
                StepId::SqlInstance,
                format!("Create Cloud SQL instance {}", d.sql_instance),
            )
            .guard(
                pinned(
                    gcloud(&["sql", "instances", "list"])
                        .flag("filter", format!("name:{}", d.sql_instance))
                        .flag("format", "value(name)"),
                ),
                Matcher::NonEmpty,
            )
            .run(pinned(
                gcloud(&["sql", "instances", "create", d.sql_instance.as_str()])
                    .flag("tier", sql.tier.as_str())
                    .flag("database-version", sql.database_version.as_str())
                    .flag("region", t.region.as_str()),
            )),
        );

        // A deployed release already holds the instance password; resetting
        // it without reinstalling the release would cut MLflow off.
        steps.push(
            Step::new(
                StepId::SqlUser,
                format!("Set password for SQL user {}", d.sql_user),
            )
            .guard(release_query.clone(), Matcher::Line(d.release.clone()))
            .run(pinned(
                gcloud(&["sql", "users", "set-password", d.sql_user.as_str()])
                    .flag("host", "%")
                    .flag("instance", d.sql_instance.as_str())
                    .secret(format!("--password={}", opts.sql_password)),
            )),
        );

        steps.push(
            Step::new(
                StepId::SqlDatabase,
                format!("Create database {}", d.sql_database),
            )
            .guard(
                pinned(
                    gcloud(&["sql", "databases", "list"])
                        .flag("instance", d.sql_instance.as_str())
                        .flag("filter", format!("name:{}", d.sql_database))
                        .flag("format", "value(name)"),
                ),
                Matcher::NonEmpty,
            )
            .run(pinned(
                gcloud(&["sql", "databases", "create", d.sql_database.as_str()])
                    .flag("instance", d.sql_instance.as_str()),
            )),
        );

        steps.push(
            Step::new(
                StepId::ArtifactBucket,
                format!("Create artifact bucket {}", d.bucket),
            )
            .guard(
                Invocation::gsutil().args(["ls", "-p", project]),
                Matcher::Line(format!("{}/", d.bucket)),
            )
            .run(Invocation::gsutil().args([
                "mb",
                "-p",
                project,
                "-l",
                t.region.as_str(),
                d.bucket.as_str(),
            ])),
        );

        let mut image = Step::new(
            StepId::MlflowImage,
            format!("Build MLflow image {}", d.image_uri),
        );
        if !opts.rebuild_image {
            image = image.guard(
                pinned(
                    gcloud(&["container", "images", "list-tags", d.image_repository.as_str()])
                        .flag("filter", format!("tags:{}", d.image_tag))
                        .flag("format", "value(digest)"),
                ),
                Matcher::NonEmpty,
            );
        }
        steps.push(
            image.run(pinned(
                gcloud(&["builds", "submit", mlflow.image_context.as_str()])
                    .flag("tag", d.image_uri.as_str())
                    .flag("timeout", mlflow.build_timeout.as_str()),
            )),
        );

        steps.push(
            Step::new(
                StepId::MlflowNamespace,
                format!("Create Kubernetes namespace {}", d.namespace),
            )
            .guard(
                Invocation::kubectl()
                    .args(["get", "namespace", d.namespace.as_str(), "--ignore-not-found"])
                    .flag("output", "name"),
                Matcher::NonEmpty,
            )
            .run(Invocation::kubectl().args(["create", "namespace", d.namespace.as_str()])),
        );

        steps.push(
            Step::new(
                StepId::MlflowRelease,
                format!("Install Helm release {}", d.release),
            )
            .guard(release_query, Matcher::Line(d.release.clone()))
            .run(
                Invocation::helm()
                    .args(["install", d.release.as_str(), mlflow.chart.as_str()])
                    .flag("namespace", d.namespace.as_str())
                    .arg("--set")
                    .arg(format!(
                        "image.repository={},image.tag={}",
                        d.image_repository, d.image_tag
                    ))
                    .arg("--set")
                    .arg(format!("backendStore.connectionName={}", d.sql_connection))
                    .arg("--set")
                    .arg(format!("backendStore.database={}", d.sql_database))
                    .arg("--set")
                    .arg(format!("backendStore.user={}", d.sql_user))
                    .arg("--set-string")
                    .secret(format!("backendStore.password={}", opts.sql_password))
                    .arg("--set")
                    .arg(format!("defaultArtifactRoot={}/mlruns", d.bucket)),
            ),
        );

        steps.push(
            Step::new(StepId::Endpoints, "Look up Airflow and MLflow endpoints")
                .capture(
                    "AIRFLOW_URI",
                    pinned(
                        gcloud(&["composer", "environments", "describe", d.composer_env.as_str()])
                            .flag("location", t.region.as_str())
                            .flag("format", "value(config.airflowUri)"),
                    ),
                    Extract::Trimmed,
                    false,
                )
                .capture(
                    "MLFLOW_URI",
                    Invocation::kubectl()
                        .args(["get", "configmap", "inverse-proxy-config", "--ignore-not-found"])
                        .flag("namespace", d.namespace.as_str())
                        .flag("output", "jsonpath={.data.Hostname}"),
                    Extract::Trimmed,
                    false,
                ),
        );

        Self { deployment, steps }
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

fn gcloud(args: &[&str]) -> Invocation {
    Invocation::gcloud().args(args.iter().copied())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
