use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{Result, StackError};
use crate::plan::StepId;

pub const GENERATED_LEN: usize = 24;

/// The SQL password for a run and whether it was generated here.
#[derive(Debug, Clone)]
pub struct SqlPassword {
    pub value: String,
    pub generated: bool,
}

impl SqlPassword {
    /// Use `supplied` when present and non-empty, otherwise generate one.
    pub fn resolve(supplied: Option<String>) -> Self {
        match supplied.filter(|p| !p.is_empty()) {
            Some(value) => Self {
                value,
                generated: false,
            },
            None => Self {
                value: generate(),
                generated: true,
            },
        }
    }

    /// A generated password only reaches the instance through `sql-user`.
    /// Installing the release without that step would hand Helm a password
    /// the instance never had.
    pub fn check_skips(&self, skip: &[StepId]) -> Result<()> {
        if self.generated
            && skip.contains(&StepId::SqlUser)
            && !skip.contains(&StepId::MlflowRelease)
        {
            return Err(StackError::PasswordRequired);
        }
        Ok(())
    }
}

pub fn generate() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_LEN)
        .map(char::from)
        .collect()
}
