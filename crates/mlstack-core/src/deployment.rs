//! Positional target arguments and the resource names derived from them.
//!
//! Every cloud resource name the installer touches is a plain concatenation
//! of the project id, deployment name, region and a fixed suffix. Keeping
//! the derivation in one place lets `plan`, `status`, `env` and `install`
//! agree on names without re-deriving them.

use crate::config::Config;
use crate::error::{Result, StackError};
use crate::invocation::Exports;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub const DEFAULT_DEPLOYMENT_NAME: &str = "mlops";
pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_ZONE: &str = "us-central1-a";

const MAX_DEPLOYMENT_NAME: usize = 20;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The four positional arguments, validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub project_id: String,
    pub deployment_name: String,
    pub region: String,
    pub zone: String,
}

impl Target {
    pub fn new(
        project_id: impl Into<String>,
        deployment_name: impl Into<String>,
        region: impl Into<String>,
        zone: impl Into<String>,
    ) -> Result<Self> {
        let target = Self {
            project_id: project_id.into(),
            deployment_name: deployment_name.into(),
            region: region.into(),
            zone: zone.into(),
        };
        target.validate()?;
        Ok(target)
    }

    /// Build a target for `project_id` with every other argument defaulted.
    pub fn with_defaults(project_id: impl Into<String>) -> Result<Self> {
        Self::new(
            project_id,
            DEFAULT_DEPLOYMENT_NAME,
            DEFAULT_REGION,
            DEFAULT_ZONE,
        )
    }

    fn validate(&self) -> Result<()> {
        if !project_re().is_match(&self.project_id) {
            return Err(StackError::InvalidProjectId(self.project_id.clone()));
        }
        if self.deployment_name.len() > MAX_DEPLOYMENT_NAME
            || !deployment_re().is_match(&self.deployment_name)
        {
            return Err(StackError::InvalidDeploymentName(
                self.deployment_name.clone(),
            ));
        }
        if !region_re().is_match(&self.region) {
            return Err(StackError::InvalidRegion(self.region.clone()));
        }
        if !zone_re().is_match(&self.zone) {
            return Err(StackError::InvalidZone(self.zone.clone()));
        }
        if !self
            .zone
            .strip_prefix(self.region.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
        {
            return Err(StackError::ZoneOutsideRegion {
                zone: self.zone.clone(),
                region: self.region.clone(),
            });
        }
        Ok(())
    }
}

static PROJECT_RE: OnceLock<Regex> = OnceLock::new();
static DEPLOYMENT_RE: OnceLock<Regex> = OnceLock::new();
static REGION_RE: OnceLock<Regex> = OnceLock::new();
static ZONE_RE: OnceLock<Regex> = OnceLock::new();

fn project_re() -> &'static Regex {
    PROJECT_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").unwrap())
}

fn deployment_re() -> &'static Regex {
    DEPLOYMENT_RE.get_or_init(|| Regex::new(r"^[a-z]([a-z0-9-]*[a-z0-9])?$").unwrap())
}

fn region_re() -> &'static Regex {
    REGION_RE.get_or_init(|| Regex::new(r"^[a-z]+-[a-z]+[0-9]+$").unwrap())
}

fn zone_re() -> &'static Regex {
    ZONE_RE.get_or_init(|| Regex::new(r"^[a-z]+-[a-z]+[0-9]+-[a-z]$").unwrap())
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// A validated target plus every name derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    #[serde(flatten)]
    pub target: Target,
    pub composer_env: String,
    pub sql_instance: String,
    pub sql_connection: String,
    pub sql_database: String,
    pub sql_user: String,
    pub bucket: String,
    pub image_repository: String,
    pub image_tag: String,
    pub image_uri: String,
    pub namespace: String,
    pub release: String,
}

impl Deployment {
    pub fn derive(target: Target, config: &Config) -> Self {
        let project = &target.project_id;
        let name = &target.deployment_name;
        let region = &target.region;

        let sql_instance = format!("{name}-sql");
        let image_repository = format!("gcr.io/{project}/{name}-mlflow");
        let image_tag = config.mlflow.image_tag.clone();

        Self {
            composer_env: format!("{name}-af"),
            sql_connection: format!("{project}:{region}:{sql_instance}"),
            sql_instance,
            sql_database: config.sql.database.clone(),
            sql_user: config.sql.user.clone(),
            bucket: format!("gs://{project}-{name}-artifacts"),
            image_uri: format!("{image_repository}:{image_tag}"),
            image_repository,
            image_tag,
            namespace: config.mlflow.namespace.clone(),
            release: format!("{name}-{}", config.mlflow.release),
            target,
        }
    }

    /// Name/value pairs exported to every child process.
    pub fn exports(&self) -> Exports {
        let t = &self.target;
        let mut exports = Exports::new();
        exports.set("PROJECT_ID", &t.project_id);
        exports.set("DEPLOYMENT_NAME", &t.deployment_name);
        exports.set("REGION", &t.region);
        exports.set("ZONE", &t.zone);
        exports.set("COMPOSER_ENV_NAME", &self.composer_env);
        exports.set("SQL_INSTANCE_NAME", &self.sql_instance);
        exports.set("SQL_CONNECTION_NAME", &self.sql_connection);
        exports.set("ARTIFACT_BUCKET", &self.bucket);
        exports.set("MLFLOW_IMAGE_URI", &self.image_uri);
        exports.set("MLFLOW_NAMESPACE", &self.namespace);
        exports.set("MLFLOW_RELEASE", &self.release);
        exports
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
