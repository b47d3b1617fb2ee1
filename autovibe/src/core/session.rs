//! Per-request engine state.
//!
//! A `Session` is created for one request and mutated only through the
//! methods below, which the engine calls in step order. Invariants:
//!
//! - `retry_count <= policy.max_retry` at all times.
//! - The artifact's logical name never changes once set.
//! - The transcript only grows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{
    CodeArtifact, ExecutionResult, GeneratedCode, GenerationMode, OutcomeVerdict, RiskLevel,
};

/// Logical name used when the first generation omits one.
const FALLBACK_NAME: &str = "script.py";

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First generation from the request alone.
    Start,
    /// Regeneration from prior code plus console history.
    Repair,
}

/// Per-request limits and switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Repair generations allowed after the initial one.
    pub max_retry: u32,
    /// Unattended execution requires risk strictly below this level.
    pub max_risk_level: RiskLevel,
    /// Ask the evaluator instead of a human whether the run succeeded.
    pub auto_check: bool,
    /// Wall-clock limit for one script run.
    pub exec_timeout: Duration,
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(anyhow!("max_retry must be > 0"));
        }
        if self.exec_timeout.is_zero() {
            return Err(anyhow!("exec_timeout must be > 0"));
        }
        Ok(())
    }
}

/// Append-only console history across all runs of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    sections: Vec<String>,
    text: String,
}

impl Transcript {
    fn append(&mut self, section: String) {
        self.text.push_str(&section);
        self.sections.push(section);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Every section in append order; their concatenation is `as_str()`.
    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    stage: Stage,
    retry_count: u32,
    policy: Policy,
    original_request: String,
    current_artifact: Option<CodeArtifact>,
    transcript: Transcript,
    outcome_history: Vec<OutcomeVerdict>,
    revisions: Vec<PathBuf>,
    executions: u32,
    free_regeneration: bool,
}

impl Session {
    pub fn new(original_request: impl Into<String>, policy: Policy) -> Self {
        Self {
            stage: Stage::Start,
            retry_count: 0,
            policy,
            original_request: original_request.into(),
            current_artifact: None,
            transcript: Transcript::default(),
            outcome_history: Vec::new(),
            revisions: Vec::new(),
            executions: 0,
            free_regeneration: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn original_request(&self) -> &str {
        &self.original_request
    }

    pub fn current_artifact(&self) -> Option<&CodeArtifact> {
        self.current_artifact.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn outcome_history(&self) -> &[OutcomeVerdict] {
        &self.outcome_history
    }

    /// Storage location of every revision saved so far, oldest first.
    pub fn revisions(&self) -> &[PathBuf] {
        &self.revisions
    }

    pub fn executions(&self) -> u32 {
        self.executions
    }

    pub fn budget_exhausted(&self) -> bool {
        self.retry_count >= self.policy.max_retry
    }

    /// Start a generation attempt and return which variant to request.
    ///
    /// Repairs consume one retry unless the previous attempt ended in an
    /// interactive install failure.
    pub(crate) fn begin_attempt(&mut self) -> GenerationMode {
        match self.stage {
            Stage::Start => {
                self.free_regeneration = false;
                GenerationMode::Initial
            }
            Stage::Repair => {
                if self.free_regeneration {
                    self.free_regeneration = false;
                } else if self.retry_count < self.policy.max_retry {
                    self.retry_count += 1;
                }
                GenerationMode::Repair
            }
        }
    }

    /// Replace the current artifact with freshly generated code.
    pub(crate) fn adopt(&mut self, generated: GeneratedCode) -> &CodeArtifact {
        let logical_name = match &self.current_artifact {
            Some(existing) => existing.logical_name.clone(),
            None => generated
                .logical_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_NAME.to_string()),
        };
        self.current_artifact.insert(CodeArtifact {
            logical_name,
            source_text: generated.source_text,
            dependencies: generated.dependencies,
        })
    }

    /// Source of the current artifact, if one was adopted.
    pub(crate) fn prior_source(&self) -> Option<&str> {
        self.current_artifact
            .as_ref()
            .map(|artifact| artifact.source_text.as_str())
    }

    pub(crate) fn record_revision(&mut self, location: PathBuf) {
        self.revisions.push(location);
    }

    pub(crate) fn record_execution(&mut self, script: &Path, result: &ExecutionResult) {
        self.executions += 1;
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.display().to_string());
        self.transcript
            .append(result.render_section(self.executions, &name));
    }

    /// Append a non-execution event (refusal, install failure) to the transcript.
    pub(crate) fn record_note(&mut self, title: &str, body: &str) {
        let mut section = format!("=== {title} ===\n");
        let body = body.trim_end();
        if !body.is_empty() {
            section.push_str(body);
            section.push('\n');
        }
        self.transcript.append(section);
    }

    pub(crate) fn record_outcome(&mut self, verdict: OutcomeVerdict) {
        self.outcome_history.push(verdict);
    }

    pub(crate) fn request_repair(&mut self) {
        self.stage = Stage::Repair;
    }

    /// Let the next generation run in the same stage without consuming a retry.
    pub(crate) fn regenerate_without_charge(&mut self) {
        self.free_regeneration = true;
    }
}
