//! Shared deterministic types for the generate-validate-execute loop.
//!
//! These types define stable contracts between the engine and its
//! collaborators. They must not depend on external state or I/O.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Risk classification assigned to generated code by the validator.
///
/// Ordered `Allow < Check < Deny`; every gate comparison goes through `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Safe to run without review.
    Allow,
    /// Needs a human look before running.
    Check,
    /// Dangerous.
    Deny,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Check => "CHECK",
            Self::Deny => "DENY",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Self::Allow),
            "CHECK" => Ok(Self::Check),
            "DENY" => Ok(Self::Deny),
            other => Err(anyhow!(
                "unknown risk level '{other}' (expected ALLOW, CHECK or DENY)"
            )),
        }
    }
}

/// Which generation variant a step asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Initial,
    Repair,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Repair => "repair",
        }
    }
}

/// Code returned by one generation call, before the session adopts it.
///
/// `logical_name` is only present on initial generation; repairs reuse the
/// name fixed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub logical_name: Option<String>,
    pub source_text: String,
    pub dependencies: Vec<String>,
}

/// One generated script plus its declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    /// Script file name, ends with `.py`. Fixed for the whole session.
    pub logical_name: String,
    pub source_text: String,
    /// Package names to install before running, in declaration order.
    pub dependencies: Vec<String>,
}

/// Validator judgment of a single artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_correct: bool,
    pub risk: RiskLevel,
    pub reasoning: String,
}

impl ValidationVerdict {
    /// Verdict used when the validator cannot be reached: send to review.
    pub fn unavailable() -> Self {
        Self {
            is_correct: true,
            risk: RiskLevel::Check,
            reasoning: "validation unavailable".to_string(),
        }
    }
}

/// How a script run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Process exited on its own.
    Exited { code: i32 },
    /// Process was killed by a signal it did not receive from us.
    Terminated,
    /// Process exceeded the wall-clock limit and was killed.
    TimedOut { after_secs: u64 },
    /// Process never started (missing interpreter, permissions, ...).
    LaunchFailed { message: String },
}

impl ExitStatus {
    pub fn describe(&self) -> String {
        match self {
            Self::Exited { code } => format!("exit code {code}"),
            Self::Terminated => "terminated by a signal".to_string(),
            Self::TimedOut { after_secs } => {
                format!("TIMED OUT after {after_secs}s: the script hung and was killed")
            }
            Self::LaunchFailed { message } => format!("failed to launch: {message}"),
        }
    }
}

/// Captured result of running one artifact in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::LaunchFailed {
                message: message.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExitStatus::Exited { code: 0 }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.status, ExitStatus::TimedOut { .. })
    }

    /// Render this run as one transcript section.
    ///
    /// Sections are self-delimiting so later readers can tell runs apart.
    pub fn render_section(&self, execution: u32, script: &str) -> String {
        let mut out = format!("=== execution {execution}: {script} ===\n");
        push_stream(&mut out, "stdout", &self.stdout);
        push_stream(&mut out, "stderr", &self.stderr);
        out.push_str(&format!("[{}]\n", self.status.describe()));
        out
    }
}

fn push_stream(out: &mut String, label: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    out.push_str(&format!("--- {label} ---\n"));
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
}

/// Aggregate result of one dependency installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub succeeded: bool,
    /// Installer stdout/stderr, kept for the transcript and the user.
    pub diagnostics: String,
}

impl InstallReport {
    pub fn nothing_to_install() -> Self {
        Self {
            succeeded: true,
            diagnostics: String::new(),
        }
    }
}

/// Evaluator judgment of whether the request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeVerdict {
    pub succeeded: bool,
    pub reasoning: String,
    pub user_message: String,
}
