//! Process invocation for the external provisioning tools.
//!
//! Everything the installer does to the cloud goes through [`CommandRunner`].
//! [`SystemRunner`] spawns real processes; tests substitute a scripted
//! runner so sequencing and failure handling can be checked without any
//! cloud tooling installed.

use std::process::{Command, Stdio};

use crate::error::{Result, StackError};
use crate::invocation::{Exports, Invocation};

/// What to do with the child's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream to the terminal. Used for long-running create actions.
    Inherit,
    /// Collect for inspection. Used for guards and captures.
    Capture,
    /// Stream to our stderr, keeping stdout free for machine-readable output.
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Captured stdout; empty unless run in [`OutputMode::Capture`].
    pub stdout: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit status to report for a failed command. Signals map to 1.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

pub trait CommandRunner {
    /// Run `invocation` with `exports` set in the child environment.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    /// Only failing to start the process is reported as `Err`.
    fn run(
        &mut self,
        invocation: &Invocation,
        exports: &Exports,
        mode: OutputMode,
    ) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &mut self,
        invocation: &Invocation,
        exports: &Exports,
        mode: OutputMode,
    ) -> Result<CommandOutput> {
        let args = invocation.expand(exports)?;
        let program = invocation.program();

        let mut cmd = Command::new(program);
        cmd.args(&args);
        for (name, value) in exports.iter() {
            cmd.env(name, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(match mode {
            OutputMode::Inherit => Stdio::inherit(),
            OutputMode::Capture => Stdio::piped(),
            OutputMode::Stderr => Stdio::from(std::io::stderr()),
        });
        // stderr always flows through so tool diagnostics reach the terminal
        cmd.stderr(Stdio::inherit());

        tracing::debug!(command = %invocation, ?mode, "spawning");

        let output = cmd.output().map_err(|e| StackError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted runner for unit tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_exit_maps_to_1() {
        let out = CommandOutput {
            code: None,
            stdout: String::new(),
        };
        assert!(!out.success());
        assert_eq!(out.exit_code(), 1);
    }
}
