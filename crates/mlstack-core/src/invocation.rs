use crate::error::{Result, StackError};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

const REDACTED: &str = "********";

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// The external command-line tools the installer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Gcloud,
    Gsutil,
    Kubectl,
    Helm,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[Tool::Gcloud, Tool::Gsutil, Tool::Kubectl, Tool::Helm]
    }

    pub fn program(self) -> &'static str {
        match self {
            Tool::Gcloud => "gcloud",
            Tool::Gsutil => "gsutil",
            Tool::Kubectl => "kubectl",
            Tool::Helm => "helm",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

/// Environment handed to every child process.
///
/// Holds the derived deployment names up front and grows as capture actions
/// record runtime values (e.g. the GKE cluster backing the Composer env).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Exports(BTreeMap<String, String>);

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Arg / Invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: String,
    secret: bool,
}

/// One external command: a tool plus its arguments.
///
/// Arguments may reference exported values as `${NAME}`; they are expanded
/// by [`Invocation::expand`] right before the process starts. Secret
/// arguments never appear in [`Display`](fmt::Display) output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    tool: Tool,
    args: Vec<Arg>,
}

impl Invocation {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            args: Vec::new(),
        }
    }

    pub fn gcloud() -> Self {
        Self::new(Tool::Gcloud)
    }

    pub fn gsutil() -> Self {
        Self::new(Tool::Gsutil)
    }

    pub fn kubectl() -> Self {
        Self::new(Tool::Kubectl)
    }

    pub fn helm() -> Self {
        Self::new(Tool::Helm)
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: false,
        });
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for v in values {
            self = self.arg(v);
        }
        self
    }

    /// `--flag=value` as a single argument.
    pub fn flag(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{name}={value}"))
    }

    /// An argument whose value is masked wherever the command is shown.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
        });
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn program(&self) -> &'static str {
        self.tool.program()
    }

    /// Arguments as displayed: secrets masked, placeholders left in place.
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                if a.secret {
                    REDACTED.to_string()
                } else {
                    a.value.clone()
                }
            })
            .collect()
    }

    /// Real argument values with `${NAME}` placeholders replaced from `exports`.
    pub fn expand(&self, exports: &Exports) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|a| {
                expand_placeholders(&a.value, exports).map_err(|name| {
                    StackError::UnknownVariable {
                        name,
                        command: self.to_string(),
                    }
                })
            })
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())?;
        for arg in self.display_args() {
            f.write_str(" ")?;
            f.write_str(&arg)?;
        }
        Ok(())
    }
}

impl Serialize for Invocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Replace every `${NAME}` in `value`. Returns the first unknown name on failure.
/// A `$` not followed by `{` is kept literally (`^release$` filters, etc).
fn expand_placeholders(value: &str, exports: &Exports) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: keep the remainder verbatim
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        match exports.get(name) {
            Some(v) => out.push_str(v),
            None => return Err(name.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
