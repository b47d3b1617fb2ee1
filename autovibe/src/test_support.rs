//! Scripted collaborators for engine, driver and server tests.
//!
//! Everything here is `Sync` so the same fakes work behind `Arc` in the HTTP
//! server tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::agents::{Agents, EvaluatorAgent, GeneratorAgent, ValidatorAgent};
use crate::core::risk_gate::Mode;
use crate::core::session::Policy;
use crate::core::types::{
    CodeArtifact, ExecutionResult, ExitStatus, InstallReport, RiskLevel, ValidationVerdict,
};
use crate::engine::{Answer, EngineEvent, Supervisor};
use crate::io::completion::{CompletionRequest, StructuredCompletion};
use crate::io::sandbox::ScriptRuntime;

/// One queued completion reply for a given schema.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub schema: &'static str,
    pub outcome: Result<Value, String>,
}

pub fn generation_reply(filename: &str, code: &str, requirements: &[&str]) -> Scripted {
    Scripted {
        schema: "code_generation",
        outcome: Ok(json!({
            "filename": filename,
            "code": code,
            "requirements": requirements,
        })),
    }
}

pub fn regeneration_reply(code: &str, requirements: &[&str]) -> Scripted {
    Scripted {
        schema: "code_regeneration",
        outcome: Ok(json!({ "code": code, "requirements": requirements })),
    }
}

pub fn verdict_reply(correct: bool, risk: RiskLevel) -> Scripted {
    Scripted {
        schema: "validation",
        outcome: Ok(json!({
            "correct": correct,
            "risk": risk.as_str(),
            "reasoning": format!("scripted {risk}"),
        })),
    }
}

pub fn outcome_reply(success: bool, message: &str) -> Scripted {
    Scripted {
        schema: "outcome",
        outcome: Ok(json!({
            "success": success,
            "reasoning": if success { "request satisfied" } else { "request not satisfied" },
            "message": message,
        })),
    }
}

/// Completion backend answering from per-schema FIFO queues.
///
/// An empty queue is an upstream failure. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    queues: Mutex<HashMap<&'static str, VecDeque<Result<Value, String>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, scripted: Scripted) -> Self {
        self.push(scripted.schema, scripted.outcome);
        self
    }

    pub fn replies(self, scripted: impl IntoIterator<Item = Scripted>) -> Self {
        scripted.into_iter().fold(self, Self::reply)
    }

    pub fn reply_raw(self, schema: &'static str, value: Value) -> Self {
        self.push(schema, Ok(value));
        self
    }

    pub fn fail(self, schema: &'static str, message: &str) -> Self {
        self.push(schema, Err(message.to_string()));
        self
    }

    fn push(&self, schema: &'static str, outcome: Result<Value, String>) {
        self.queues
            .lock()
            .expect("queues lock")
            .entry(schema)
            .or_default()
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn requests_for(&self, schema: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.schema_name == schema)
            .collect()
    }

    pub fn calls(&self, schema: &str) -> usize {
        self.requests_for(schema).len()
    }
}

impl StructuredCompletion for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self
            .queues
            .lock()
            .expect("queues lock")
            .get_mut(request.schema_name)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted reply for {}", request.schema_name)),
        }
    }
}

pub fn exited(code: i32, stdout: &str) -> ExecutionResult {
    ExecutionResult {
        status: ExitStatus::Exited { code },
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn timed_out(after_secs: u64, stdout: &str) -> ExecutionResult {
    ExecutionResult {
        status: ExitStatus::TimedOut { after_secs },
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Runtime that returns queued install reports and execution results.
///
/// Installs succeed and executions exit 0 with no output once the queues run dry.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    installs: Mutex<VecDeque<Result<InstallReport, String>>>,
    executions: Mutex<VecDeque<ExecutionResult>>,
    installed: Mutex<Vec<Vec<String>>>,
    executed: Mutex<Vec<(PathBuf, Duration)>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution(self, result: ExecutionResult) -> Self {
        self.executions
            .lock()
            .expect("executions lock")
            .push_back(result);
        self
    }

    pub fn install_failure(self, diagnostics: &str) -> Self {
        self.installs
            .lock()
            .expect("installs lock")
            .push_back(Ok(InstallReport {
                succeeded: false,
                diagnostics: diagnostics.to_string(),
            }));
        self
    }

    pub fn provisioning_error(self, message: &str) -> Self {
        self.installs
            .lock()
            .expect("installs lock")
            .push_back(Err(message.to_string()));
        self
    }

    /// Dependency lists passed to `install`, in call order.
    pub fn installed(&self) -> Vec<Vec<String>> {
        self.installed.lock().expect("installed lock").clone()
    }

    /// Scripts passed to `execute` with their timeouts, in call order.
    pub fn executed(&self) -> Vec<(PathBuf, Duration)> {
        self.executed.lock().expect("executed lock").clone()
    }
}

impl ScriptRuntime for ScriptedRuntime {
    fn install(&self, dependencies: &[String]) -> Result<InstallReport> {
        self.installed
            .lock()
            .expect("installed lock")
            .push(dependencies.to_vec());
        match self.installs.lock().expect("installs lock").pop_front() {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(InstallReport {
                succeeded: true,
                diagnostics: "installed".to_string(),
            }),
        }
    }

    fn execute(&self, script: &Path, timeout: Duration) -> ExecutionResult {
        self.executed
            .lock()
            .expect("executed lock")
            .push((script.to_path_buf(), timeout));
        self.executions
            .lock()
            .expect("executions lock")
            .pop_front()
            .unwrap_or_else(|| exited(0, ""))
    }

    fn interpreter(&self) -> PathBuf {
        PathBuf::from("/scripted/venv/bin/python")
    }
}

/// Supervisor answering from queues. An empty queue answers `Interrupted`.
#[derive(Debug)]
pub struct ScriptedSupervisor {
    mode: Mode,
    approvals: VecDeque<Answer>,
    confirmations: VecDeque<Answer>,
    /// `(risk, dangerous)` of every gate question asked.
    pub gate_questions: Vec<(RiskLevel, bool)>,
    /// Results shown at every outcome question.
    pub outcome_questions: Vec<ExecutionResult>,
    /// Debug rendering of every event.
    pub events: Vec<String>,
}

impl ScriptedSupervisor {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            approvals: VecDeque::new(),
            confirmations: VecDeque::new(),
            gate_questions: Vec::new(),
            outcome_questions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn interactive() -> Self {
        Self::new(Mode::Interactive)
    }

    pub fn approvals(mut self, answers: impl IntoIterator<Item = Answer>) -> Self {
        self.approvals.extend(answers);
        self
    }

    pub fn confirmations(mut self, answers: impl IntoIterator<Item = Answer>) -> Self {
        self.confirmations.extend(answers);
        self
    }
}

impl Supervisor for ScriptedSupervisor {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn approve(
        &mut self,
        _artifact: &CodeArtifact,
        verdict: &ValidationVerdict,
        dangerous: bool,
    ) -> Result<Answer> {
        self.gate_questions.push((verdict.risk, dangerous));
        Ok(self.approvals.pop_front().unwrap_or(Answer::Interrupted))
    }

    fn confirm_outcome(&mut self, result: &ExecutionResult) -> Result<Answer> {
        self.outcome_questions.push(result.clone());
        Ok(self.confirmations.pop_front().unwrap_or(Answer::Interrupted))
    }

    fn notify(&mut self, event: &EngineEvent<'_>) {
        self.events.push(format!("{event:?}"));
    }
}

/// Agents with constant environment text.
pub fn test_agents() -> Agents {
    Agents {
        generator: GeneratorAgent::new("gen-model", PathBuf::from("/scripted/venv/bin/python"))
            .with_system_info("OS: scripted"),
        validator: ValidatorAgent::new("val-model"),
        evaluator: EvaluatorAgent::new("val-model"),
    }
}

pub fn policy(max_retry: u32, max_risk_level: RiskLevel, auto_check: bool) -> Policy {
    Policy {
        max_retry,
        max_risk_level,
        auto_check,
        exec_timeout: Duration::from_secs(5),
    }
}
