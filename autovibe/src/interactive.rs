//! Prompting driver: a human answers gate and outcome questions.

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::warn;

use crate::core::risk_gate::Mode;
use crate::core::session::Policy;
use crate::core::terminal::Terminal;
use crate::core::types::{CodeArtifact, ExecutionResult, GenerationMode, ValidationVerdict};
use crate::engine::{Answer, Collaborators, Engine, EngineEvent, Supervisor};
use crate::io::completion::StructuredCompletion;
use crate::io::console::Console;
use crate::io::sandbox::ScriptRuntime;

const QUIT_WORDS: &[&str] = &["quit", "exit", "q"];
const RULE: &str = "============================================================";

const GATE_QUESTION: &str = "\nExecute this code? (y/n/preview):";
const GATE_HINT: &str = "Please enter 'y' for yes, 'n' for no, or 'p' to preview the code.";
const OUTCOME_QUESTION: &str = "\nVibe check: success or no? y/n";
const OUTCOME_HINT: &str = "Please enter 'y' for yes or 'n' for no.";

/// Supervisor backed by a console.
pub struct ConsoleSupervisor<R, W> {
    console: Console<R, W>,
}

#[derive(Debug, Clone, Copy)]
enum GateChoice {
    Run,
    Skip,
    Preview,
}

impl<R: BufRead, W: Write> ConsoleSupervisor<R, W> {
    pub fn new(console: Console<R, W>) -> Self {
        Self { console }
    }

    pub fn into_console(self) -> Console<R, W> {
        self.console
    }

    fn show_gate(&mut self, artifact: &CodeArtifact, verdict: &ValidationVerdict, dangerous: bool) -> Result<()> {
        let mut text = format!(
            "\n{RULE}\nGENERATED CODE REVIEW\n{RULE}\nFile:       {}\nValidation: {}\nRisk:       {}\nReasoning:  {}",
            artifact.logical_name,
            if verdict.is_correct { "correct" } else { "issues found" },
            verdict.risk,
            verdict.reasoning,
        );
        if !artifact.dependencies.is_empty() {
            text.push_str(&format!("\nRequires:   {}", artifact.dependencies.join(", ")));
        }
        if dangerous {
            text.push_str(
                "\n\n!! The validator marked this code as DANGEROUS.\n!! Make sure whatever you are doing is worth it.",
            );
        }
        self.console.say(&text)
    }

    fn show_source(&mut self, artifact: &CodeArtifact) -> Result<()> {
        self.console.say(&format!(
            "\n--- {} ---\n{}\n--- end of {} ---",
            artifact.logical_name,
            artifact.source_text.trim_end(),
            artifact.logical_name
        ))
    }
}

impl<R: BufRead, W: Write> Supervisor for ConsoleSupervisor<R, W> {
    fn mode(&self) -> Mode {
        Mode::Interactive
    }

    fn approve(
        &mut self,
        artifact: &CodeArtifact,
        verdict: &ValidationVerdict,
        dangerous: bool,
    ) -> Result<Answer> {
        self.show_gate(artifact, verdict, dangerous)?;
        loop {
            let choice = self
                .console
                .choose(GATE_QUESTION, GATE_HINT, parse_gate_choice)?;
            match choice {
                None => return Ok(Answer::Interrupted),
                Some(GateChoice::Run) => return Ok(Answer::Yes),
                Some(GateChoice::Skip) => return Ok(Answer::No),
                Some(GateChoice::Preview) => {
                    self.show_source(artifact)?;
                    self.show_gate(artifact, verdict, dangerous)?;
                }
            }
        }
    }

    fn confirm_outcome(&mut self, _result: &ExecutionResult) -> Result<Answer> {
        let answer = self
            .console
            .choose(OUTCOME_QUESTION, OUTCOME_HINT, parse_yes_no)?;
        Ok(match answer {
            Some(true) => Answer::Yes,
            Some(false) => Answer::No,
            None => Answer::Interrupted,
        })
    }

    fn notify(&mut self, event: &EngineEvent<'_>) {
        // Progress output never fails the session.
        if let Err(err) = self.console.say(&describe_event(event)) {
            warn!(err = %format!("{err:#}"), "failed to write progress to console");
        }
    }
}

fn parse_gate_choice(answer: &str) -> Option<GateChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(GateChoice::Run),
        "n" | "no" => Some(GateChoice::Skip),
        "p" | "preview" => Some(GateChoice::Preview),
        _ => None,
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

fn describe_event(event: &EngineEvent<'_>) -> String {
    match event {
        EngineEvent::Generating {
            mode: GenerationMode::Initial,
            ..
        } => "Generating code...".to_string(),
        EngineEvent::Generating {
            mode: GenerationMode::Repair,
            retry_count,
            max_retry,
        } => format!("Repairing code (attempt {retry_count} of {max_retry})..."),
        EngineEvent::Saved { location, .. } => format!("Code saved to {}", location.display()),
        EngineEvent::Validated { .. } => "Code validated.".to_string(),
        EngineEvent::Refused { reason } => format!("Execution refused: {}", reason.describe()),
        EngineEvent::Installing { dependencies } => {
            format!("Installing requirements: {}", dependencies.join(", "))
        }
        EngineEvent::InstallFailed { diagnostics } => format!(
            "Failed to install requirements; asking for a new version.\n{}",
            diagnostics.trim()
        ),
        EngineEvent::Executing { script } => {
            format!("Executing {}\n{}", script.display(), "=".repeat(50))
        }
        EngineEvent::Executed { result } => {
            let mut text = String::new();
            if !result.stdout.is_empty() {
                text.push_str("Output:\n");
                text.push_str(result.stdout.trim_end());
                text.push('\n');
            }
            if !result.stderr.is_empty() {
                text.push_str("Errors:\n");
                text.push_str(result.stderr.trim_end());
                text.push('\n');
            }
            let status = if result.succeeded() {
                "Execution completed successfully".to_string()
            } else {
                format!("Execution failed: {}", result.status.describe())
            };
            text.push_str(&status);
            text
        }
        EngineEvent::Evaluated { verdict } => format!(
            "AUTO CHECK: {}\nReasoning: {}\nMessage:   {}",
            if verdict.succeeded { "passed" } else { "NOT passed, trying again" },
            verdict.reasoning,
            verdict.user_message
        ),
        EngineEvent::EvaluationUnavailable { error } => {
            format!("Automatic check unavailable ({error}); asking you instead.")
        }
    }
}

/// Print the banner and read the request. `None` means the user quit.
pub fn read_request<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<Option<String>> {
    console.say("AI code generator and executor\nType 'quit' or 'exit' to stop\n")?;
    let request = console.prompt("State your request:")?;
    Ok(request.filter(|r| !r.is_empty() && !QUIT_WORDS.contains(&r.to_ascii_lowercase().as_str())))
}

/// One-paragraph explanation of why the session ended.
pub fn explain(terminal: &Terminal) -> String {
    match terminal {
        Terminal::Succeeded { message } => format!("Done. {message}"),
        Terminal::Cancelled { reason } => format!("Execution cancelled: {reason}."),
        Terminal::Exhausted { .. } => format!(
            "Tried hard but that is too many attempts; stopping. ({})",
            terminal.describe()
        ),
        Terminal::Fatal { .. } => format!("Stopped: {}", terminal.describe()),
    }
}

/// Run one request end to end, prompting on `console`.
///
/// Returns `None` when the user quit before a request was made.
pub fn run_interactive<Rd, W, C, R>(
    console: Console<Rd, W>,
    collab: Collaborators<'_, C, R>,
    policy: Policy,
) -> Result<Option<Terminal>>
where
    Rd: BufRead,
    W: Write,
    C: StructuredCompletion + ?Sized,
    R: ScriptRuntime + ?Sized,
{
    let mut console = console;
    let Some(request) = read_request(&mut console)? else {
        console.say("Ok, see you next time!")?;
        return Ok(None);
    };
    let mut supervisor = ConsoleSupervisor::new(console);
    let mut engine = Engine::new(request, policy, collab);
    let terminal = engine.run_to_completion(&mut supervisor);
    let mut console = supervisor.into_console();
    console.say(&format!("\n{}", explain(&terminal)))?;
    Ok(Some(terminal))
}
