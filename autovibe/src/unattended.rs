//! Non-prompting driver behind the tool command and the HTTP endpoint.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::risk_gate::Mode;
use crate::core::session::Policy;
use crate::core::terminal::Terminal;
use crate::core::types::{CodeArtifact, ExecutionResult, OutcomeVerdict, ValidationVerdict};
use crate::engine::{Answer, Collaborators, Engine, Supervisor};
use crate::io::completion::StructuredCompletion;
use crate::io::sandbox::ScriptRuntime;

/// Supervisor for runs without a human: never approves a gate question and
/// treats a clean exit as success when no evaluator decided.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnattendedSupervisor;

impl Supervisor for UnattendedSupervisor {
    fn mode(&self) -> Mode {
        Mode::Unattended
    }

    fn approve(
        &mut self,
        _artifact: &CodeArtifact,
        _verdict: &ValidationVerdict,
        _dangerous: bool,
    ) -> Result<Answer> {
        Ok(Answer::No)
    }

    fn confirm_outcome(&mut self, result: &ExecutionResult) -> Result<Answer> {
        Ok(if result.succeeded() {
            Answer::Yes
        } else {
            Answer::No
        })
    }
}

/// Structured result returned to programmatic callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReturn {
    pub is_error: bool,
    pub content: String,
    #[serde(default, alias = "results")]
    pub outcome_history: Vec<OutcomeVerdict>,
}

impl ToolReturn {
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: content.into(),
            outcome_history: Vec::new(),
        }
    }
}

/// Run one request to completion without prompting.
#[instrument(skip_all, fields(max_retry = policy.max_retry, auto_check = policy.auto_check))]
pub fn run_tool<C, R>(collab: Collaborators<'_, C, R>, request: &str, policy: Policy) -> ToolReturn
where
    C: StructuredCompletion + ?Sized,
    R: ScriptRuntime + ?Sized,
{
    if let Err(err) = policy.validate() {
        return ToolReturn::error(format!("invalid policy: {err:#}"));
    }
    let mut engine = Engine::new(request, policy, collab);
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);
    let session = engine.into_session();
    let outcome_history = session.outcome_history().to_vec();
    match terminal {
        Terminal::Succeeded { message } => {
            info!(revisions = session.revisions().len(), "tool run succeeded");
            ToolReturn {
                is_error: false,
                content: message,
                outcome_history,
            }
        }
        other => {
            warn!(outcome = %other.describe(), "tool run did not succeed");
            ToolReturn {
                is_error: true,
                content: other.describe(),
                outcome_history,
            }
        }
    }
}
