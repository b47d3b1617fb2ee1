//! Outcome evaluation from the request and the console transcript.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::OutcomeVerdict;
use crate::io::completion::{CompletionRequest, StructuredCompletion, complete_as};
use crate::io::prompt::PromptEngine;

use super::embedded_schema;

const OUTCOME_SCHEMA: &str = include_str!("../../schemas/outcome.schema.json");

#[derive(Debug, Deserialize)]
struct OutcomeReply {
    success: bool,
    reasoning: String,
    message: String,
}

#[derive(Debug)]
pub struct EvaluatorAgent {
    model: String,
    prompts: PromptEngine,
    schema: Value,
}

impl EvaluatorAgent {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            prompts: PromptEngine::new(),
            schema: embedded_schema(OUTCOME_SCHEMA),
        }
    }

    #[instrument(skip_all, fields(transcript_bytes = transcript.len()))]
    pub fn evaluate<C>(&self, completion: &C, request: &str, transcript: &str) -> Result<OutcomeVerdict>
    where
        C: StructuredCompletion + ?Sized,
    {
        let (system, user) = self.prompts.evaluation(request, transcript)?;
        let request = CompletionRequest {
            model: self.model.clone(),
            system,
            user,
            schema_name: "outcome",
            schema: self.schema.clone(),
        };
        let reply: OutcomeReply = complete_as(completion, &request)?;
        debug!(success = reply.success, "evaluated outcome");
        Ok(OutcomeVerdict {
            succeeded: reply.success,
            reasoning: reply.reasoning,
            user_message: reply.message,
        })
    }
}
