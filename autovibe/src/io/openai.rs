//! OpenAI-compatible chat completions backend (OpenRouter by default).

use std::env;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::io::completion::{CompletionRequest, StructuredCompletion, parse_json_reply};
use crate::io::config::BackendConfig;

/// Bytes of an error response body kept in the error message.
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Blocking `/chat/completions` client with strict JSON-schema responses.
///
/// Must not be created or dropped on an async runtime thread.
#[derive(Debug)]
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    api_key_env: String,
}

impl OpenAiCompletion {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&cfg.base_url),
            api_key_env: cfg.api_key_env.clone(),
        })
    }

    /// The key is read per call so a missing key fails the call, not startup.
    fn api_key(&self) -> Result<String> {
        match env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(anyhow!(
                "API key not found: set the {} environment variable",
                self.api_key_env
            )),
        }
    }
}

impl StructuredCompletion for OpenAiCompletion {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, schema = request.schema_name))]
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let key = self.api_key()?;
        info!(model = %request.model, "requesting completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&chat_body(request))
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            warn!(%status, "completion request rejected");
            bail!("completion request failed with {status}: {body}");
        }
        let parsed: ChatResponse = response.json().context("decode chat completion")?;
        let content = first_content(parsed)?;
        debug!(reply_bytes = content.len(), "completion received");
        parse_json_reply(&content)
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn chat_body(request: &CompletionRequest) -> Value {
    json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "strict": true,
                "schema": request.schema,
            },
        },
    })
}

fn first_content(response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("completion returned no choices"))?;
    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(anyhow!(
            "completion returned no content (finish_reason: {})",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        )),
    }
}
