//! Generate, validate, execute and repair: the per-request state machine.
//!
//! [`Engine::step`] runs one iteration over the [`Session`] and either loops
//! (`Continue`) or reaches a [`Terminal`]. Everything that needs a human goes
//! through the [`Supervisor`] seam, so the same step logic backs the
//! interactive prompt loop and the unattended tool/HTTP drivers.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agents, GenerationInput};
use crate::core::risk_gate::{self, GateDecision, Mode, RefusalReason};
use crate::core::session::{Policy, Session};
use crate::core::terminal::{FatalKind, StepOutcome, Terminal};
use crate::core::types::{
    CodeArtifact, ExecutionResult, GenerationMode, OutcomeVerdict, ValidationVerdict,
};
use crate::io::artifact_store::ArtifactStore;
use crate::io::completion::StructuredCompletion;
use crate::io::sandbox::ScriptRuntime;

/// A human's (or a stand-in's) answer to a yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// Input ended or the human walked away.
    Interrupted,
}

/// Progress report emitted while a step runs.
#[derive(Debug)]
pub enum EngineEvent<'a> {
    Generating {
        mode: GenerationMode,
        retry_count: u32,
        max_retry: u32,
    },
    Saved {
        artifact: &'a CodeArtifact,
        location: &'a Path,
    },
    Validated {
        verdict: &'a ValidationVerdict,
    },
    Refused {
        reason: RefusalReason,
    },
    Installing {
        dependencies: &'a [String],
    },
    InstallFailed {
        diagnostics: &'a str,
    },
    Executing {
        script: &'a Path,
    },
    Executed {
        result: &'a ExecutionResult,
    },
    Evaluated {
        verdict: &'a OutcomeVerdict,
    },
    EvaluationUnavailable {
        error: &'a str,
    },
}

/// Decisions that need a human.
///
/// Unattended implementations never block: they answer from policy.
pub trait Supervisor {
    fn mode(&self) -> Mode;

    /// Gate question for `CHECK`/`DENY` verdicts.
    fn approve(
        &mut self,
        artifact: &CodeArtifact,
        verdict: &ValidationVerdict,
        dangerous: bool,
    ) -> Result<Answer>;

    /// Whether the run satisfied the request, when no evaluator decided.
    fn confirm_outcome(&mut self, result: &ExecutionResult) -> Result<Answer>;

    fn notify(&mut self, _event: &EngineEvent<'_>) {}
}

/// Everything a step needs besides the session.
pub struct Collaborators<'a, C: ?Sized, R: ?Sized> {
    pub completion: &'a C,
    pub runtime: &'a R,
    pub store: &'a ArtifactStore,
    pub agents: &'a Agents,
}

impl<C: ?Sized, R: ?Sized> Clone for Collaborators<'_, C, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: ?Sized, R: ?Sized> Copy for Collaborators<'_, C, R> {}

pub struct Engine<'a, C: ?Sized, R: ?Sized> {
    session: Session,
    collab: Collaborators<'a, C, R>,
}

impl<'a, C, R> Engine<'a, C, R>
where
    C: StructuredCompletion + ?Sized,
    R: ScriptRuntime + ?Sized,
{
    /// Start a session. The policy must already be validated.
    pub fn new(request: impl Into<String>, policy: Policy, collab: Collaborators<'a, C, R>) -> Self {
        Self {
            session: Session::new(request, policy),
            collab,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Drive the session until it reaches a terminal outcome.
    ///
    /// Errors from the engine's own I/O become [`FatalKind::Internal`].
    pub fn run_to_completion<S: Supervisor + ?Sized>(&mut self, supervisor: &mut S) -> Terminal {
        loop {
            match self.step(supervisor) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Finished(terminal)) => {
                    info!(
                        success = terminal.is_success(),
                        retry_count = self.session.retry_count(),
                        executions = self.session.executions(),
                        "session finished"
                    );
                    return terminal;
                }
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "session aborted");
                    return Terminal::Fatal {
                        kind: FatalKind::Internal,
                        message: format!("{err:#}"),
                    };
                }
            }
        }
    }

    /// Run one iteration.
    #[instrument(skip_all, fields(stage = ?self.session.stage(), retry_count = self.session.retry_count()))]
    pub fn step<S: Supervisor + ?Sized>(&mut self, supervisor: &mut S) -> Result<StepOutcome> {
        let mode = supervisor.mode();
        let policy = self.session.policy().clone();

        if self.session.budget_exhausted() {
            info!(max_retry = policy.max_retry, "retry budget exhausted");
            return Ok(finished(Terminal::Exhausted {
                retry_count: self.session.retry_count(),
                max_retry: policy.max_retry,
            }));
        }

        let generation_mode = self.session.begin_attempt();
        supervisor.notify(&EngineEvent::Generating {
            mode: generation_mode,
            retry_count: self.session.retry_count(),
            max_retry: policy.max_retry,
        });
        let generated = self.collab.agents.generator.generate(
            self.collab.completion,
            &GenerationInput {
                mode: generation_mode,
                request: self.session.original_request(),
                prior_source: self.session.prior_source(),
                transcript: self.session.transcript().as_str(),
            },
        );
        let generated = match generated {
            Ok(generated) => generated,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "generation failed");
                return Ok(finished(Terminal::Fatal {
                    kind: FatalKind::UpstreamCapability,
                    message: format!(
                        "code generation failed ({err:#}); check your API key, billing, or backend settings"
                    ),
                }));
            }
        };

        let artifact = self.session.adopt(generated).clone();
        let location = self.collab.store.save(&artifact)?;
        self.session.record_revision(location.clone());
        supervisor.notify(&EngineEvent::Saved {
            artifact: &artifact,
            location: &location,
        });

        let verdict = self
            .collab
            .agents
            .validator
            .validate_or_default(self.collab.completion, &artifact.source_text);
        supervisor.notify(&EngineEvent::Validated { verdict: &verdict });

        let decision = risk_gate::decide(&verdict, policy.max_risk_level, mode);
        debug!(?decision, risk = %verdict.risk, "gate decision");
        match decision {
            GateDecision::Proceed => {}
            GateDecision::Ask { dangerous } => {
                match supervisor.approve(&artifact, &verdict, dangerous)? {
                    Answer::Yes => {}
                    Answer::No => {
                        return Ok(finished(Terminal::Cancelled {
                            reason: "execution declined at the risk gate".to_string(),
                        }));
                    }
                    Answer::Interrupted => return Ok(finished(interrupted())),
                }
            }
            GateDecision::Refuse(reason) => {
                supervisor.notify(&EngineEvent::Refused { reason });
                match mode {
                    Mode::Interactive => {
                        return Ok(finished(Terminal::Cancelled {
                            reason: format!("{} ({})", reason.describe(), verdict.reasoning),
                        }));
                    }
                    Mode::Unattended => {
                        self.session.record_note(
                            "execution refused",
                            &format!("{}\nvalidator: {}", reason.describe(), verdict.reasoning),
                        );
                        self.session.request_repair();
                        return Ok(StepOutcome::Continue);
                    }
                }
            }
        }

        if !artifact.dependencies.is_empty() {
            supervisor.notify(&EngineEvent::Installing {
                dependencies: &artifact.dependencies,
            });
            let report = match self.collab.runtime.install(&artifact.dependencies) {
                Ok(report) => report,
                Err(err) => {
                    return Ok(finished(Terminal::Fatal {
                        kind: FatalKind::Sandbox,
                        message: format!("isolated environment unavailable: {err:#}"),
                    }));
                }
            };
            if !report.succeeded {
                let packages = artifact.dependencies.join(" ");
                self.session.record_note(
                    &format!("dependency install failed: {packages}"),
                    &report.diagnostics,
                );
                supervisor.notify(&EngineEvent::InstallFailed {
                    diagnostics: &report.diagnostics,
                });
                match mode {
                    Mode::Interactive => {
                        self.session.regenerate_without_charge();
                        return Ok(StepOutcome::Continue);
                    }
                    Mode::Unattended => {
                        return Ok(finished(Terminal::Fatal {
                            kind: FatalKind::DependencyInstall,
                            message: format!(
                                "could not install {packages}:\n{}",
                                report.diagnostics.trim()
                            ),
                        }));
                    }
                }
            }
        }

        supervisor.notify(&EngineEvent::Executing { script: &location });
        let result = self
            .collab
            .runtime
            .execute(&location, policy.exec_timeout);
        self.session.record_execution(&location, &result);
        supervisor.notify(&EngineEvent::Executed { result: &result });

        if policy.auto_check {
            let evaluation = self.collab.agents.evaluator.evaluate(
                self.collab.completion,
                self.session.original_request(),
                self.session.transcript().as_str(),
            );
            match evaluation {
                Ok(outcome) => {
                    supervisor.notify(&EngineEvent::Evaluated { verdict: &outcome });
                    let succeeded = outcome.succeeded;
                    let message = outcome.user_message.clone();
                    self.session.record_outcome(outcome);
                    if succeeded {
                        return Ok(finished(Terminal::Succeeded { message }));
                    }
                    self.session.request_repair();
                    return Ok(StepOutcome::Continue);
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(err = %error, "outcome evaluation failed");
                    if mode == Mode::Unattended {
                        return Ok(finished(Terminal::Fatal {
                            kind: FatalKind::UpstreamCapability,
                            message: format!("outcome evaluation failed: {error}"),
                        }));
                    }
                    supervisor.notify(&EngineEvent::EvaluationUnavailable { error: &error });
                }
            }
        }

        match supervisor.confirm_outcome(&result)? {
            Answer::Yes => Ok(finished(Terminal::Succeeded {
                message: success_message(&result),
            })),
            Answer::No => {
                self.session.request_repair();
                Ok(StepOutcome::Continue)
            }
            Answer::Interrupted => Ok(finished(interrupted())),
        }
    }
}

fn finished(terminal: Terminal) -> StepOutcome {
    StepOutcome::Finished(terminal)
}

fn interrupted() -> Terminal {
    Terminal::Cancelled {
        reason: "interrupted".to_string(),
    }
}

fn success_message(result: &ExecutionResult) -> String {
    let stdout = result.stdout.trim();
    if stdout.is_empty() {
        "script completed successfully".to_string()
    } else {
        stdout.to_string()
    }
}
