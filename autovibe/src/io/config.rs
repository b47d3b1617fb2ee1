//! Autovibe configuration stored in `autovibe.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::session::Policy;
use crate::core::types::RiskLevel;

pub const DEFAULT_CONFIG_PATH: &str = "autovibe.toml";

/// Autovibe configuration (TOML).
///
/// Missing fields default to the values the tool ships with. Front-ends
/// layer per-request [`PolicyOverrides`] on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutovibeConfig {
    /// Repair generations allowed after the first one.
    pub max_retry: u32,

    /// Unattended runs execute only below this risk level.
    pub max_risk_level: RiskLevel,

    /// Let the evaluator decide success instead of asking.
    pub auto_check: bool,

    /// Wall-clock limit for one script run, in seconds.
    pub exec_timeout_secs: u64,

    /// Wall-clock limit for one dependency installation, in seconds.
    pub install_timeout_secs: u64,

    /// Bytes of stdout/stderr kept per script run.
    pub output_limit_bytes: usize,

    /// Artifact store directory; also hosts the isolated `venv/`.
    pub scripts_dir: PathBuf,

    /// Interpreter used once to create the isolated environment.
    pub bootstrap_python: String,

    pub backend: BackendConfig,
}

/// Which structured-completion provider the agents talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions endpoint.
    Openai,
    /// Local `codex exec`.
    Codex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    /// Environment variable holding the API key (never the key itself).
    pub api_key_env: String,
    pub generate_model: String,
    pub validate_model: String,
    pub request_timeout_secs: u64,
    pub codex_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Openai,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPEN_ROUTER_KEY".to_string(),
            generate_model: "google/gemini-2.5-flash-preview-05-20".to_string(),
            validate_model: "google/gemini-2.5-flash-preview-05-20".to_string(),
            request_timeout_secs: 120,
            codex_timeout_secs: 10 * 60,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn codex_timeout(&self) -> Duration {
        Duration::from_secs(self.codex_timeout_secs)
    }
}

impl Default for AutovibeConfig {
    fn default() -> Self {
        Self {
            max_retry: 2,
            max_risk_level: RiskLevel::Deny,
            auto_check: false,
            exec_timeout_secs: 120,
            install_timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            scripts_dir: PathBuf::from("vibe_scripts"),
            bootstrap_python: "python3".to_string(),
            backend: BackendConfig::default(),
        }
    }
}

impl AutovibeConfig {
    pub fn validate(&self) -> Result<()> {
        self.policy().validate()?;
        if self.install_timeout_secs == 0 {
            return Err(anyhow!("install_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.scripts_dir.as_os_str().is_empty() {
            return Err(anyhow!("scripts_dir must be non-empty"));
        }
        if self.bootstrap_python.trim().is_empty() {
            return Err(anyhow!("bootstrap_python must be non-empty"));
        }
        if self.backend.request_timeout_secs == 0 || self.backend.codex_timeout_secs == 0 {
            return Err(anyhow!("backend timeouts must be > 0"));
        }
        if self.backend.kind == BackendKind::Openai && self.backend.base_url.trim().is_empty() {
            return Err(anyhow!("backend.base_url must be non-empty"));
        }
        Ok(())
    }

    /// Session policy from the configured defaults.
    pub fn policy(&self) -> Policy {
        Policy {
            max_retry: self.max_retry,
            max_risk_level: self.max_risk_level,
            auto_check: self.auto_check,
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
        }
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// Per-request overrides from CLI flags or an HTTP body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub max_retry: Option<u32>,
    pub max_risk_level: Option<RiskLevel>,
    pub auto_check: Option<bool>,
    pub exec_timeout_secs: Option<u64>,
}

impl PolicyOverrides {
    pub fn apply(&self, mut base: Policy) -> Policy {
        if let Some(max_retry) = self.max_retry {
            base.max_retry = max_retry;
        }
        if let Some(level) = self.max_risk_level {
            base.max_risk_level = level;
        }
        if let Some(auto_check) = self.auto_check {
            base.auto_check = auto_check;
        }
        if let Some(secs) = self.exec_timeout_secs {
            base.exec_timeout = Duration::from_secs(secs);
        }
        base
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutovibeConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutovibeConfig> {
    if !path.exists() {
        let cfg = AutovibeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutovibeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutovibeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
