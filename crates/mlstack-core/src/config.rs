use crate::error::{Result, StackError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_CONFIG_FILE: &str = "mlstack.yaml";
pub const CONFIG_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ComposerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposerConfig {
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u32,
    #[serde(default = "default_image_version")]
    pub image_version: String,
    #[serde(default = "default_python_version")]
    pub python_version: String,
}

fn default_machine_type() -> String {
    "n1-standard-2".to_string()
}

fn default_node_count() -> u32 {
    3
}

fn default_disk_size_gb() -> u32 {
    50
}

fn default_image_version() -> String {
    "composer-1.17.0-airflow-1.10.15".to_string()
}

fn default_python_version() -> String {
    "3".to_string()
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            machine_type: default_machine_type(),
            node_count: default_node_count(),
            disk_size_gb: default_disk_size_gb(),
            image_version: default_image_version(),
            python_version: default_python_version(),
        }
    }
}

// ---------------------------------------------------------------------------
// SqlConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlConfig {
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default = "default_database_version")]
    pub database_version: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_tier() -> String {
    "db-n1-standard-1".to_string()
}

fn default_database_version() -> String {
    "MYSQL_5_7".to_string()
}

fn default_database() -> String {
    "mlflow".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            tier: default_tier(),
            database_version: default_database_version(),
            database: default_database(),
            user: default_user(),
        }
    }
}

// ---------------------------------------------------------------------------
// MlflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlflowConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Release name suffix; the Helm release is `{deployment}-{release}`.
    #[serde(default = "default_release")]
    pub release: String,
    #[serde(default = "default_chart")]
    pub chart: String,
    #[serde(default = "default_image_context")]
    pub image_context: String,
    #[serde(default = "default_image_tag")]
    pub image_tag: String,
    #[serde(default = "default_build_timeout")]
    pub build_timeout: String,
}

fn default_namespace() -> String {
    "mlflow".to_string()
}

fn default_release() -> String {
    "mlflow".to_string()
}

fn default_chart() -> String {
    "./mlflow-helm".to_string()
}

fn default_image_context() -> String {
    "./images/mlflow".to_string()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_build_timeout() -> String {
    "1200s".to_string()
}

impl Default for MlflowConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            release: default_release(),
            chart: default_chart(),
            image_context: default_image_context(),
            image_tag: default_image_tag(),
            build_timeout: default_build_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub mlflow: MlflowConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_services() -> Vec<String> {
    [
        "cloudbuild.googleapis.com",
        "container.googleapis.com",
        "cloudresourcemanager.googleapis.com",
        "iam.googleapis.com",
        "containerregistry.googleapis.com",
        "containeranalysis.googleapis.com",
        "ml.googleapis.com",
        "sqladmin.googleapis.com",
        "dataflow.googleapis.com",
        "automl.googleapis.com",
        "composer.googleapis.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            services: default_services(),
            composer: ComposerConfig::default(),
            sql: SqlConfig::default(),
            mlflow: MlflowConfig::default(),
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StackError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Resolve the effective config.
    ///
    /// An explicit path must exist. Without one, `mlstack.yaml` in `cwd` is
    /// used when present, otherwise the built-in defaults.
    pub fn resolve(explicit: Option<&Path>, cwd: &Path) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let cfg = Self::load(path)?;
            return Ok((cfg, ConfigSource::File(path.to_path_buf())));
        }
        let default_path = cwd.join(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            let cfg = Self::load(&default_path)?;
            return Ok((cfg, ConfigSource::File(default_path)));
        }
        Ok((Self::default(), ConfigSource::Defaults))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != CONFIG_VERSION {
            warnings.push(ConfigWarning::warning(format!(
                "unknown config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        if self.services.is_empty() {
            warnings.push(ConfigWarning::warning(
                "no services listed; nothing will be enabled",
            ));
        }
        for service in &self.services {
            if !service.ends_with(".googleapis.com") {
                warnings.push(ConfigWarning::warning(format!(
                    "service '{service}' does not look like a googleapis.com service name"
                )));
            }
        }

        // Composer refuses environments with fewer than three nodes
        if self.composer.node_count < 3 {
            warnings.push(ConfigWarning::error(format!(
                "composer.node_count={} (minimum is 3)",
                self.composer.node_count
            )));
        }
        if self.composer.machine_type.trim().is_empty() {
            warnings.push(ConfigWarning::error("composer.machine_type is empty"));
        }

        if self.sql.database.trim().is_empty() {
            warnings.push(ConfigWarning::error("sql.database is empty"));
        }
        if self.sql.user.trim().is_empty() {
            warnings.push(ConfigWarning::error("sql.user is empty"));
        }

        if !is_dns_label(&self.mlflow.namespace) {
            warnings.push(ConfigWarning::error(format!(
                "mlflow.namespace '{}' is not a valid Kubernetes namespace name",
                self.mlflow.namespace
            )));
        }
        if !is_dns_label(&self.mlflow.release) {
            warnings.push(ConfigWarning::error(format!(
                "mlflow.release '{}' is not a valid Helm release name",
                self.mlflow.release
            )));
        }
        if self.mlflow.chart.trim().is_empty() {
            warnings.push(ConfigWarning::error("mlflow.chart is empty"));
        }
        if self.mlflow.image_context.trim().is_empty() {
            warnings.push(ConfigWarning::error("mlflow.image_context is empty"));
        }
        if self.mlflow.image_tag.trim().is_empty() {
            warnings.push(ConfigWarning::error("mlflow.image_tag is empty"));
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

static DNS_LABEL_RE: OnceLock<Regex> = OnceLock::new();

fn dns_label_re() -> &'static Regex {
    DNS_LABEL_RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap())
}

/// RFC 1123 label, as Kubernetes requires for namespace names.
pub fn is_dns_label(s: &str) -> bool {
    s.len() <= 63 && dns_label_re().is_match(s)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
