//! Isolated interpreter environment for generated scripts.
//!
//! One `venv/` under the artifact store directory is created lazily on first
//! use and reused afterwards. Installs are additive. Provisioning and
//! installation are serialized through one lock because the installer is not
//! reentrant; script runs are not serialized.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ExecutionResult, ExitStatus, InstallReport};
use crate::io::config::AutovibeConfig;
use crate::io::process::{ProcessLimits, run_command_with_timeout};

/// Limit for the one-time `python -m venv` call.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Runtime that installs dependencies and runs stored scripts.
pub trait ScriptRuntime {
    /// Install packages into the runtime.
    ///
    /// `Ok` with `succeeded = false` is an installer failure with diagnostics;
    /// `Err` means the runtime itself could not be provisioned.
    fn install(&self, dependencies: &[String]) -> Result<InstallReport>;

    /// Run a stored script under a hard timeout. Never fails: launch problems
    /// are reported as [`ExitStatus::LaunchFailed`].
    fn execute(&self, script: &Path, timeout: Duration) -> ExecutionResult;

    /// Interpreter path shown to the generator as environment context.
    fn interpreter(&self) -> PathBuf;
}

/// Python virtual environment sandbox.
#[derive(Debug)]
pub struct VenvSandbox {
    venv_dir: PathBuf,
    interpreter: PathBuf,
    /// `None` when the interpreter is supplied pre-provisioned.
    bootstrap: Option<String>,
    install_timeout: Duration,
    output_limit_bytes: usize,
    provision_lock: Mutex<()>,
}

impl VenvSandbox {
    /// Sandbox rooted at `<scripts_dir>/venv`, created with `bootstrap_python`.
    pub fn from_config(cfg: &AutovibeConfig) -> Self {
        let venv_dir = cfg.scripts_dir.join("venv");
        Self {
            interpreter: venv_interpreter(&venv_dir),
            venv_dir,
            bootstrap: Some(cfg.bootstrap_python.clone()),
            install_timeout: cfg.install_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
            provision_lock: Mutex::new(()),
        }
    }

    /// Sandbox around an existing interpreter; never provisions anything.
    pub fn with_interpreter(
        interpreter: impl Into<PathBuf>,
        install_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        let interpreter = interpreter.into();
        Self {
            venv_dir: interpreter
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            interpreter,
            bootstrap: None,
            install_timeout,
            output_limit_bytes,
            provision_lock: Mutex::new(()),
        }
    }

    pub fn venv_dir(&self) -> &Path {
        &self.venv_dir
    }

    /// Create the environment if it does not exist yet. Idempotent.
    #[instrument(skip_all, fields(venv = %self.venv_dir.display()))]
    pub fn ensure_environment(&self) -> Result<()> {
        let _guard = self
            .provision_lock
            .lock()
            .map_err(|_| anyhow!("sandbox lock poisoned"))?;
        self.provision_locked()
    }

    fn provision_locked(&self) -> Result<()> {
        let Some(bootstrap) = &self.bootstrap else {
            return Ok(());
        };
        if self.interpreter.exists() {
            return Ok(());
        }
        info!(bootstrap = %bootstrap, "creating isolated environment");
        let mut cmd = Command::new(bootstrap);
        cmd.arg("-m").arg("venv").arg(&self.venv_dir);
        let output = run_command_with_timeout(
            cmd,
            None,
            ProcessLimits {
                timeout: PROVISION_TIMEOUT,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
        .with_context(|| format!("run {bootstrap} -m venv"))?;
        if !output.success() {
            bail!(
                "creating {} failed:\n{}",
                self.venv_dir.display(),
                output.combined_text()
            );
        }
        if !self.interpreter.exists() {
            bail!(
                "environment created but {} is missing",
                self.interpreter.display()
            );
        }
        info!(interpreter = %self.interpreter.display(), "isolated environment ready");
        Ok(())
    }
}

impl ScriptRuntime for VenvSandbox {
    #[instrument(skip_all, fields(dependency_count = dependencies.len()))]
    fn install(&self, dependencies: &[String]) -> Result<InstallReport> {
        if dependencies.is_empty() {
            return Ok(InstallReport::nothing_to_install());
        }
        // Held until the installer exits.
        let _guard = self
            .provision_lock
            .lock()
            .map_err(|_| anyhow!("sandbox lock poisoned"))?;
        self.provision_locked()?;

        info!(packages = %dependencies.join(" "), "installing dependencies");
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--disable-pip-version-check")
            .args(dependencies);
        let limits = ProcessLimits {
            timeout: self.install_timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let report = match run_command_with_timeout(cmd, None, limits) {
            Ok(output) => InstallReport {
                succeeded: output.success(),
                diagnostics: output.combined_text(),
            },
            Err(err) => InstallReport {
                succeeded: false,
                diagnostics: format!("could not run installer: {err:#}"),
            },
        };
        if report.succeeded {
            debug!("dependencies installed");
        } else {
            warn!("dependency installation failed");
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(script = %script.display(), timeout_secs = timeout.as_secs()))]
    fn execute(&self, script: &Path, timeout: Duration) -> ExecutionResult {
        if let Err(err) = self.ensure_environment() {
            return ExecutionResult::launch_failed(format!("{err:#}"));
        }
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1");
        let limits = ProcessLimits {
            timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        match run_command_with_timeout(cmd, None, limits) {
            Ok(output) => {
                let status = if output.timed_out {
                    ExitStatus::TimedOut {
                        after_secs: timeout.as_secs(),
                    }
                } else {
                    match output.status.code() {
                        Some(code) => ExitStatus::Exited { code },
                        None => ExitStatus::Terminated,
                    }
                };
                ExecutionResult {
                    status,
                    stdout: output.stdout_text(),
                    stderr: output.stderr_text(),
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "script could not be launched");
                ExecutionResult::launch_failed(format!(
                    "{} {}: {err:#}",
                    self.interpreter.display(),
                    script.display()
                ))
            }
        }
    }

    fn interpreter(&self) -> PathBuf {
        self.interpreter.clone()
    }
}

fn venv_interpreter(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir.join("Scripts").join("python.exe")
    } else {
        venv_dir.join("bin").join("python")
    }
}
