//! Completion backend that shells out to `codex exec`.
//!
//! The schema is written next to the output file and passed with
//! `--output-schema`; the final message lands in `--output-last-message`.
//! The prompt goes in on stdin.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::completion::{CompletionRequest, StructuredCompletion, parse_json_reply};
use crate::io::process::{ProcessLimits, run_command_with_timeout};

#[derive(Debug, Clone)]
pub struct CodexCompletion {
    workdir: PathBuf,
    program: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CodexCompletion {
    pub fn new(workdir: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            program: PathBuf::from("codex"),
            timeout,
            output_limit_bytes,
        }
    }

    /// Use a different executable in place of `codex`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl StructuredCompletion for CodexCompletion {
    #[instrument(skip_all, fields(schema = request.schema_name, timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        fs::create_dir_all(&self.workdir)
            .with_context(|| format!("create codex workdir {}", self.workdir.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix(".codex-")
            .tempdir_in(&self.workdir)
            .with_context(|| format!("create scratch dir in {}", self.workdir.display()))?;
        let schema_path = scratch.path().join(format!("{}.schema.json", request.schema_name));
        let output_path = scratch.path().join("output.json");
        let schema = serde_json::to_string_pretty(&request.schema).context("serialize schema")?;
        fs::write(&schema_path, schema)
            .with_context(|| format!("write schema {}", schema_path.display()))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("exec")
            .arg("--skip-git-repo-check")
            .arg("--sandbox")
            .arg("read-only")
            .arg("--model")
            .arg(&request.model)
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&self.workdir);

        info!("starting codex exec");
        let prompt = render_prompt(request);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            ProcessLimits {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
        .context("run codex exec")?;

        if output.timed_out {
            warn!("codex exec timed out");
            return Err(anyhow!("codex exec timed out after {:?}", self.timeout));
        }
        if !output.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            return Err(anyhow!(
                "codex exec failed with status {:?}:\n{}",
                output.status.code(),
                output.stderr_text()
            ));
        }
        let reply = fs::read_to_string(&output_path)
            .with_context(|| format!("read codex output {}", output_path.display()))?;
        debug!(reply_bytes = reply.len(), "codex exec completed");
        parse_json_reply(&reply)
    }
}

fn render_prompt(request: &CompletionRequest) -> String {
    format!(
        "{}\n\n---\n\n{}\n\nReply with a single JSON object matching the `{}` schema.\n",
        request.system.trim(),
        request.user.trim(),
        request.schema_name
    )
}
