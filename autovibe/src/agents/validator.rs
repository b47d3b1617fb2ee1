//! Safety and correctness review of generated source.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::core::types::{RiskLevel, ValidationVerdict};
use crate::io::completion::{CompletionRequest, StructuredCompletion, complete_as};
use crate::io::prompt::PromptEngine;

use super::embedded_schema;

const VALIDATION_SCHEMA: &str = include_str!("../../schemas/validation.schema.json");

#[derive(Debug, Deserialize)]
struct ValidationReply {
    correct: bool,
    risk: RiskLevel,
    reasoning: String,
}

#[derive(Debug)]
pub struct ValidatorAgent {
    model: String,
    prompts: PromptEngine,
    schema: Value,
}

impl ValidatorAgent {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            prompts: PromptEngine::new(),
            schema: embedded_schema(VALIDATION_SCHEMA),
        }
    }

    #[instrument(skip_all, fields(source_bytes = source.len()))]
    pub fn validate<C>(&self, completion: &C, source: &str) -> Result<ValidationVerdict>
    where
        C: StructuredCompletion + ?Sized,
    {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: self.prompts.validation_system()?,
            user: source.to_string(),
            schema_name: "validation",
            schema: self.schema.clone(),
        };
        let reply: ValidationReply = complete_as(completion, &request)?;
        Ok(ValidationVerdict {
            is_correct: reply.correct,
            risk: reply.risk,
            reasoning: reply.reasoning,
        })
    }

    /// Like [`validate`](Self::validate), but an unreachable validator yields
    /// [`ValidationVerdict::unavailable`] so the code goes to review.
    pub fn validate_or_default<C>(&self, completion: &C, source: &str) -> ValidationVerdict
    where
        C: StructuredCompletion + ?Sized,
    {
        match self.validate(completion, source) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "validation unavailable, defaulting to CHECK");
                ValidationVerdict::unavailable()
            }
        }
    }
}
