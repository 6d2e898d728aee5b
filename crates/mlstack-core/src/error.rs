use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid project id '{0}': must be 6-30 lowercase letters, digits, or hyphens, starting with a letter")]
    InvalidProjectId(String),

    #[error("invalid deployment name '{0}': must be lowercase alphanumeric with hyphens, start with a letter, at most 20 characters")]
    InvalidDeploymentName(String),

    #[error("invalid region '{0}': expected something like 'us-central1'")]
    InvalidRegion(String),

    #[error("invalid zone '{0}': expected something like 'us-central1-a'")]
    InvalidZone(String),

    #[error("zone '{zone}' is not in region '{region}'")]
    ZoneOutsideRegion { zone: String, region: String },

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("unknown variable '${{{name}}}' in command `{command}`")]
    UnknownVariable { name: String, command: String },

    #[error("step '{step}' captured an empty value for {var} from `{command}`")]
    EmptyCapture {
        step: String,
        var: String,
        command: String,
    },

    #[error("step '{step}' failed: command `{command}` exited with status {exit_code}")]
    StepFailed {
        step: String,
        command: String,
        exit_code: i32,
    },

    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("skipping sql-user needs --sql-password (or MLSTACK_SQL_PASSWORD) set to the instance's current password")]
    PasswordRequired,

    #[error("missing required tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("config file already exists: {0} (use --force to overwrite)")]
    ConfigExists(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StackError {
    /// Process exit status for this error.
    ///
    /// A failed external command propagates its own status; a tool that could
    /// not be started maps to 127, the shell's "command not found".
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::StepFailed { exit_code, .. } => *exit_code,
            StackError::Spawn { .. } => 127,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failure_keeps_command_exit_code() {
        let err = StackError::StepFailed {
            step: "sql-instance".to_string(),
            command: "gcloud sql instances create mlops-sql".to_string(),
            exit_code: 3,
        };
        assert_eq!(err.exit_code(), 3);
        let msg = err.to_string();
        assert!(msg.contains("sql-instance"));
        assert!(msg.contains("gcloud sql instances create mlops-sql"));
        assert!(msg.contains("status 3"));
    }

    #[test]
    fn spawn_failure_maps_to_127() {
        let err = StackError::Spawn {
            program: "helm".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn other_errors_map_to_1() {
        assert_eq!(StackError::UnknownStep("nope".into()).exit_code(), 1);
        assert_eq!(
            StackError::MissingTools(vec!["helm".into(), "kubectl".into()]).to_string(),
            "missing required tools: helm, kubectl"
        );
    }
}
