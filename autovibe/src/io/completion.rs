//! Structured completion seam used by every agent.
//!
//! A backend turns `(system, user, schema)` into one JSON value. The caller
//! validates that value against the schema before trusting it, so backends
//! never need to know what the response means.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::codex::CodexCompletion;
use crate::io::config::{AutovibeConfig, BackendKind};
use crate::io::openai::OpenAiCompletion;

/// One structured completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    /// Stable schema identifier, also used as the provider-side schema name.
    pub schema_name: &'static str,
    pub schema: Value,
}

/// Provider-agnostic "given this schema and this text, return a matching value".
pub trait StructuredCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}

impl<C: StructuredCompletion + ?Sized> StructuredCompletion for Box<C> {
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        (**self).complete(request)
    }
}

impl<C: StructuredCompletion + ?Sized> StructuredCompletion for &C {
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        (**self).complete(request)
    }
}

/// Run a completion and decode it as `T` after schema validation.
#[instrument(skip_all, fields(schema = request.schema_name, model = %request.model))]
pub fn complete_as<C, T>(backend: &C, request: &CompletionRequest) -> Result<T>
where
    C: StructuredCompletion + ?Sized,
    T: DeserializeOwned,
{
    let value = backend
        .complete(request)
        .with_context(|| format!("{} completion", request.schema_name))?;
    validate_schema(&value, &request.schema)
        .with_context(|| format!("{} response", request.schema_name))?;
    debug!("completion matched schema");
    serde_json::from_value(value).with_context(|| format!("decode {} response", request.schema_name))
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        warn!(violations = messages.len(), "response failed schema validation");
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```$").expect("static regex"));

/// Parse a model reply as JSON, tolerating one surrounding Markdown fence.
pub fn parse_json_reply(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty completion reply"));
    }
    let body = FENCED_JSON
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());
    serde_json::from_str(body).context("parse completion reply as json")
}

/// Build the backend selected in config.
///
/// `workdir` is where `codex exec` runs and keeps its schema/output files.
pub fn backend_from_config(
    cfg: &AutovibeConfig,
    workdir: &Path,
) -> Result<Box<dyn StructuredCompletion>> {
    match cfg.backend.kind {
        BackendKind::Openai => Ok(Box::new(OpenAiCompletion::from_config(&cfg.backend)?)),
        BackendKind::Codex => Ok(Box::new(CodexCompletion::new(
            workdir,
            cfg.backend.codex_timeout(),
            cfg.output_limit_bytes,
        ))),
    }
}
