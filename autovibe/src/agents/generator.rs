//! Code generation agent (initial and repair variants).

use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{GeneratedCode, GenerationMode};
use crate::io::completion::{CompletionRequest, StructuredCompletion, complete_as};
use crate::io::prompt::{GenerationPromptInput, PromptEngine};
use crate::io::system_info;

use super::embedded_schema;

const INITIAL_SCHEMA: &str = include_str!("../../schemas/code_generation.schema.json");
const REPAIR_SCHEMA: &str = include_str!("../../schemas/code_regeneration.schema.json");

#[derive(Debug, Deserialize)]
struct InitialReply {
    filename: String,
    code: String,
    requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RepairReply {
    code: String,
    requirements: Vec<String>,
}

/// What the generator sees for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub mode: GenerationMode,
    pub request: &'a str,
    /// Source of the current artifact; used in repair mode.
    pub prior_source: Option<&'a str>,
    /// Full console transcript so far; used in repair mode.
    pub transcript: &'a str,
}

#[derive(Debug)]
pub struct GeneratorAgent {
    model: String,
    interpreter: PathBuf,
    fixed_system_info: Option<String>,
    prompts: PromptEngine,
    initial_schema: Value,
    repair_schema: Value,
}

impl GeneratorAgent {
    pub fn new(model: &str, interpreter: PathBuf) -> Self {
        Self {
            model: model.to_string(),
            interpreter,
            fixed_system_info: None,
            prompts: PromptEngine::new(),
            initial_schema: embedded_schema(INITIAL_SCHEMA),
            repair_schema: embedded_schema(REPAIR_SCHEMA),
        }
    }

    /// Use constant environment text instead of probing the host per call.
    pub fn with_system_info(mut self, text: impl Into<String>) -> Self {
        self.fixed_system_info = Some(text.into());
        self
    }

    #[instrument(skip_all, fields(mode = input.mode.as_str()))]
    pub fn generate<C>(&self, completion: &C, input: &GenerationInput<'_>) -> Result<GeneratedCode>
    where
        C: StructuredCompletion + ?Sized,
    {
        let system_info = match &self.fixed_system_info {
            Some(text) => text.clone(),
            None => system_info::describe(&self.interpreter),
        };
        let repair = input.mode == GenerationMode::Repair;
        let (system, user) = self.prompts.generation(&GenerationPromptInput {
            mode: input.mode,
            request: input.request,
            prior_source: input.prior_source,
            transcript: repair.then_some(input.transcript),
            system_info: &system_info,
        })?;

        let generated = if repair {
            let request = CompletionRequest {
                model: self.model.clone(),
                system,
                user,
                schema_name: "code_regeneration",
                schema: self.repair_schema.clone(),
            };
            let reply: RepairReply = complete_as(completion, &request)?;
            GeneratedCode {
                logical_name: None,
                source_text: reply.code,
                dependencies: normalize_requirements(&reply.requirements),
            }
        } else {
            let request = CompletionRequest {
                model: self.model.clone(),
                system,
                user,
                schema_name: "code_generation",
                schema: self.initial_schema.clone(),
            };
            let reply: InitialReply = complete_as(completion, &request)?;
            GeneratedCode {
                logical_name: Some(reply.filename),
                source_text: reply.code,
                dependencies: normalize_requirements(&reply.requirements),
            }
        };

        if generated.source_text.trim().is_empty() {
            bail!("generation returned empty code");
        }
        debug!(
            code_bytes = generated.source_text.len(),
            dependencies = generated.dependencies.len(),
            "generated script"
        );
        Ok(generated)
    }
}

/// Trim, split space-separated entries, drop blanks and duplicates; keep order.
fn normalize_requirements(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in raw.iter().flat_map(|entry| entry.split_whitespace()) {
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}
