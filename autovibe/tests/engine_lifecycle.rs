//! End-to-end engine scenarios driven through scripted collaborators.
//!
//! Each test wires a `ScriptedCompletion`, a `ScriptedRuntime` and a real
//! `ArtifactStore` in a temp dir, then runs one session to a terminal outcome.

use autovibe::core::risk_gate::Mode;
use autovibe::core::terminal::{FatalKind, Terminal};
use autovibe::core::types::RiskLevel;
use autovibe::engine::{Answer, Collaborators, Engine};
use autovibe::io::artifact_store::ArtifactStore;
use autovibe::test_support::{
    ScriptedCompletion, ScriptedRuntime, ScriptedSupervisor, exited, generation_reply,
    outcome_reply, policy, regeneration_reply, test_agents, timed_out, verdict_reply,
};
use autovibe::unattended::{UnattendedSupervisor, run_tool};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: ArtifactStore,
    agents: autovibe::agents::Agents,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::open(dir.path().join("scripts")).expect("store");
        Self {
            _dir: dir,
            store,
            agents: test_agents(),
        }
    }

    fn collab<'a>(
        &'a self,
        completion: &'a ScriptedCompletion,
        runtime: &'a ScriptedRuntime,
    ) -> Collaborators<'a, ScriptedCompletion, ScriptedRuntime> {
        Collaborators {
            completion,
            runtime,
            store: &self.store,
            agents: &self.agents,
        }
    }
}

#[test]
fn allow_with_passing_evaluation_succeeds_without_prompting() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("count_files.py", "print(3)\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .reply(outcome_reply(true, "3 files found"));
    let runtime = ScriptedRuntime::new().execution(exited(0, "3\n"));
    let mut supervisor = ScriptedSupervisor::interactive();

    let mut engine = Engine::new(
        "count files",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert_eq!(
        terminal,
        Terminal::Succeeded {
            message: "3 files found".to_string()
        }
    );
    assert!(supervisor.gate_questions.is_empty());
    assert!(supervisor.outcome_questions.is_empty());
    let session = engine.session();
    assert_eq!(session.retry_count(), 0);
    assert_eq!(session.executions(), 1);
    assert_eq!(session.outcome_history().len(), 1);
    assert_eq!(runtime.executed().len(), 1);
    assert!(runtime.installed().is_empty());
}

#[test]
fn unattended_deny_at_deny_ceiling_goes_to_repair() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("wipe.py", "import shutil\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Deny))
        .reply(regeneration_reply("print('listing only')\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .reply(outcome_reply(true, "listed"));
    let runtime = ScriptedRuntime::new().execution(exited(0, "listed\n"));

    let mut engine = Engine::new(
        "clean up",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    assert!(terminal.is_success(), "{terminal:?}");
    assert_eq!(runtime.executed().len(), 1, "the DENY revision never runs");
    let session = engine.session();
    assert_eq!(session.retry_count(), 1);
    assert!(session.transcript().as_str().contains("execution refused"));
    let repair = &completion.requests_for("code_regeneration")[0];
    assert!(repair.user.contains("import shutil"));
    assert!(repair.user.contains("execution refused"));
}

#[test]
fn budget_of_two_allows_three_generations_then_exhausts() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("flaky.py", "raise SystemExit(1)\n", &[]))
        .replies([
            regeneration_reply("raise SystemExit(2)\n", &[]),
            regeneration_reply("raise SystemExit(3)\n", &[]),
        ])
        .replies((0..3).map(|_| verdict_reply(true, RiskLevel::Allow)))
        .replies((0..3).map(|_| outcome_reply(false, "still failing")));
    let runtime = ScriptedRuntime::new()
        .execution(exited(1, ""))
        .execution(exited(2, ""))
        .execution(exited(3, ""));

    let mut engine = Engine::new(
        "do the thing",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    assert_eq!(
        terminal,
        Terminal::Exhausted {
            retry_count: 2,
            max_retry: 2
        }
    );
    assert_eq!(completion.calls("code_generation"), 1);
    assert_eq!(completion.calls("code_regeneration"), 2);
    assert_eq!(engine.session().executions(), 3);
    assert_eq!(engine.session().revisions().len(), 3);
}

#[test]
fn interactive_timeout_rejected_by_user_feeds_timeout_into_repair() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("hang.py", "while True: pass\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .reply(regeneration_reply("print('done')\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow));
    let runtime = ScriptedRuntime::new()
        .execution(timed_out(5, "starting\n"))
        .execution(exited(0, "done\n"));
    let mut supervisor =
        ScriptedSupervisor::interactive().confirmations([Answer::No, Answer::Yes]);

    let mut engine = Engine::new(
        "wait for it",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert_eq!(
        terminal,
        Terminal::Succeeded {
            message: "done".to_string()
        }
    );
    let repair = &completion.requests_for("code_regeneration")[0];
    assert!(repair.user.contains("TIMED OUT"), "{}", repair.user);
    assert!(repair.user.contains("while True: pass"));
    assert!(repair.system.contains("MODE: REPAIR"));
    assert_eq!(supervisor.outcome_questions.len(), 2);
}

#[test]
fn transcript_is_the_concatenation_of_its_sections() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("a.py", "print(1)\n", &[]))
        .reply(regeneration_reply("print(2)\n", &[]))
        .replies((0..2).map(|_| verdict_reply(true, RiskLevel::Allow)))
        .reply(outcome_reply(false, "not yet"))
        .reply(outcome_reply(true, "ok"));
    let runtime = ScriptedRuntime::new()
        .execution(exited(1, "one\n"))
        .execution(exited(0, "two\n"));

    let mut engine = Engine::new(
        "r",
        policy(3, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    assert!(engine.run_to_completion(&mut UnattendedSupervisor).is_success());

    let transcript = engine.session().transcript();
    assert_eq!(transcript.sections().len(), 2);
    assert_eq!(transcript.sections().concat(), transcript.as_str());
    assert!(transcript.sections()[0].contains("one"));
    assert!(transcript.sections()[1].contains("two"));
}

#[test]
fn logical_name_and_store_survive_repairs() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("report.py", "print(1)\n", &[]))
        .reply(regeneration_reply("print(2)\n", &[]))
        .replies((0..2).map(|_| verdict_reply(true, RiskLevel::Allow)));
    let runtime = ScriptedRuntime::new();
    let mut supervisor =
        ScriptedSupervisor::interactive().confirmations([Answer::No, Answer::Yes]);

    let mut engine = Engine::new(
        "report",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    assert!(engine.run_to_completion(&mut supervisor).is_success());

    let session = engine.session();
    let artifact = session.current_artifact().expect("artifact");
    assert_eq!(artifact.logical_name, "report.py");
    let revisions = session.revisions();
    assert_eq!(revisions.len(), 2);
    assert_ne!(revisions[0], revisions[1]);
    for path in revisions {
        let name = path.file_name().expect("name").to_string_lossy();
        assert!(name.starts_with("report_") && name.ends_with(".py"), "{name}");
        assert!(path.is_file());
    }
}

#[test]
fn interactive_decline_at_gate_cancels_without_running() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("rm.py", "import os\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Deny));
    let runtime = ScriptedRuntime::new();
    let mut supervisor = ScriptedSupervisor::interactive().approvals([Answer::No]);

    let mut engine = Engine::new(
        "delete temp",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert!(matches!(terminal, Terminal::Cancelled { .. }), "{terminal:?}");
    assert_eq!(supervisor.gate_questions, vec![(RiskLevel::Deny, true)]);
    assert!(runtime.executed().is_empty());
}

#[test]
fn interrupted_gate_question_cancels() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Check));
    let runtime = ScriptedRuntime::new();
    let mut supervisor = ScriptedSupervisor::interactive();

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert_eq!(
        terminal,
        Terminal::Cancelled {
            reason: "interrupted".to_string()
        }
    );
    assert_eq!(supervisor.gate_questions, vec![(RiskLevel::Check, false)]);
}

#[test]
fn incorrect_code_is_refused_interactively() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "pritn(1)\n", &[]))
        .reply(verdict_reply(false, RiskLevel::Allow));
    let runtime = ScriptedRuntime::new();
    let mut supervisor = ScriptedSupervisor::interactive();

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    let Terminal::Cancelled { reason } = terminal else {
        panic!("expected cancellation, got {terminal:?}");
    };
    assert!(reason.contains("incorrect"), "{reason}");
    assert!(supervisor.gate_questions.is_empty());
    assert!(runtime.executed().is_empty());
}

#[test]
fn unavailable_validator_routes_to_human_review() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .fail("validation", "rate limited");
    let runtime = ScriptedRuntime::new().execution(exited(0, "1\n"));
    let mut supervisor = ScriptedSupervisor::interactive()
        .approvals([Answer::Yes])
        .confirmations([Answer::Yes]);

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    assert!(engine.run_to_completion(&mut supervisor).is_success());
    assert_eq!(supervisor.gate_questions, vec![(RiskLevel::Check, false)]);
}

#[test]
fn unavailable_validator_blocks_unattended_check_ceiling() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .fail("validation", "rate limited")
        .reply(regeneration_reply("print(2)\n", &[]))
        .fail("validation", "rate limited");
    let runtime = ScriptedRuntime::new();

    let mut engine = Engine::new(
        "x",
        policy(1, RiskLevel::Check, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    assert!(matches!(terminal, Terminal::Exhausted { .. }), "{terminal:?}");
    assert!(runtime.executed().is_empty());
}

#[test]
fn generation_failure_is_fatal_with_credentials_hint() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new().fail("code_generation", "401 unauthorized");
    let runtime = ScriptedRuntime::new();

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    let Terminal::Fatal { kind, message } = terminal else {
        panic!("expected fatal, got {terminal:?}");
    };
    assert_eq!(kind, FatalKind::UpstreamCapability);
    assert!(message.contains("401 unauthorized"));
    assert!(message.contains("API key"));
    assert!(fx.store.dir().read_dir().expect("read dir").next().is_none());
}

#[test]
fn interactive_install_failure_retries_the_same_stage_for_free() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("fetch.py", "import reqeusts\n", &["reqeusts"]))
        .reply(generation_reply("other.py", "import requests\n", &["requests"]))
        .replies((0..2).map(|_| verdict_reply(true, RiskLevel::Allow)));
    let runtime = ScriptedRuntime::new()
        .install_failure("ERROR: No matching distribution found for reqeusts")
        .execution(exited(0, "fetched\n"));
    let mut supervisor = ScriptedSupervisor::interactive().confirmations([Answer::Yes]);

    let mut engine = Engine::new(
        "fetch a page",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert!(terminal.is_success(), "{terminal:?}");
    assert_eq!(engine.session().retry_count(), 0);
    assert_eq!(
        runtime.installed(),
        vec![vec!["reqeusts".to_string()], vec!["requests".to_string()]]
    );
    assert_eq!(completion.calls("code_generation"), 2);
    assert_eq!(completion.calls("code_regeneration"), 0);
    let session = engine.session();
    assert_eq!(
        session.current_artifact().expect("artifact").logical_name,
        "fetch.py"
    );
    assert!(
        session
            .transcript()
            .as_str()
            .contains("dependency install failed: reqeusts")
    );
}

#[test]
fn unattended_install_failure_is_fatal_without_a_run() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("fetch.py", "import nope\n", &["nope"]))
        .reply(verdict_reply(true, RiskLevel::Allow));
    let runtime = ScriptedRuntime::new().install_failure("no such package");

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    let Terminal::Fatal { kind, message } = terminal else {
        panic!("expected fatal, got {terminal:?}");
    };
    assert_eq!(kind, FatalKind::DependencyInstall);
    assert!(message.contains("nope"));
    assert!(runtime.executed().is_empty());
}

#[test]
fn unprovisionable_sandbox_is_fatal() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("fetch.py", "import requests\n", &["requests"]))
        .reply(verdict_reply(true, RiskLevel::Allow));
    let runtime = ScriptedRuntime::new().provisioning_error("python3 not found");
    let mut supervisor = ScriptedSupervisor::new(Mode::Interactive);

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, false),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut supervisor);

    assert!(
        matches!(
            terminal,
            Terminal::Fatal {
                kind: FatalKind::Sandbox,
                ..
            }
        ),
        "{terminal:?}"
    );
}

#[test]
fn failed_evaluation_is_fatal_when_unattended() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .fail("outcome", "quota exceeded");
    let runtime = ScriptedRuntime::new().execution(exited(0, "1\n"));

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    let terminal = engine.run_to_completion(&mut UnattendedSupervisor);

    assert!(
        matches!(
            terminal,
            Terminal::Fatal {
                kind: FatalKind::UpstreamCapability,
                ..
            }
        ),
        "{terminal:?}"
    );
}

#[test]
fn failed_evaluation_falls_back_to_human_when_interactive() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .fail("outcome", "quota exceeded");
    let runtime = ScriptedRuntime::new().execution(exited(0, "1\n"));
    let mut supervisor = ScriptedSupervisor::interactive().confirmations([Answer::Yes]);

    let mut engine = Engine::new(
        "x",
        policy(2, RiskLevel::Deny, true),
        fx.collab(&completion, &runtime),
    );
    assert!(engine.run_to_completion(&mut supervisor).is_success());
    assert_eq!(supervisor.outcome_questions.len(), 1);
    assert!(
        supervisor
            .events
            .iter()
            .any(|e| e.starts_with("EvaluationUnavailable"))
    );
}

#[test]
fn run_tool_reports_success_with_outcome_history() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "print(1)\n", &[]))
        .reply(verdict_reply(true, RiskLevel::Allow))
        .reply(outcome_reply(true, "printed 1"));
    let runtime = ScriptedRuntime::new().execution(exited(0, "1\n"));

    let result = run_tool(
        fx.collab(&completion, &runtime),
        "print one",
        policy(1, RiskLevel::Deny, true),
    );

    assert!(!result.is_error);
    assert_eq!(result.content, "printed 1");
    assert_eq!(result.outcome_history.len(), 1);
}

#[test]
fn run_tool_reports_exhaustion_as_error() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new()
        .reply(generation_reply("x.py", "raise SystemExit(1)\n", &[]))
        .reply(regeneration_reply("raise SystemExit(1)\n", &[]))
        .replies((0..2).map(|_| verdict_reply(true, RiskLevel::Allow)));
    let runtime = ScriptedRuntime::new()
        .execution(exited(1, ""))
        .execution(exited(1, ""));

    let result = run_tool(
        fx.collab(&completion, &runtime),
        "x",
        policy(1, RiskLevel::Deny, false),
    );

    assert!(result.is_error);
    assert!(result.content.contains("retry budget exhausted"), "{}", result.content);
    assert!(result.outcome_history.is_empty());
}

#[test]
fn run_tool_rejects_zero_retry_budget() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new();
    let runtime = ScriptedRuntime::new();

    let result = run_tool(
        fx.collab(&completion, &runtime),
        "x",
        policy(0, RiskLevel::Deny, false),
    );

    assert!(result.is_error);
    assert!(result.content.contains("max_retry"));
    assert!(completion.requests().is_empty());
}
