//! Prompt rendering for the generator, validator and evaluator.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::GenerationMode;

const GENERATE_SYSTEM_TEMPLATE: &str = include_str!("prompts/generate_system.md");
const GENERATE_REQUEST_TEMPLATE: &str = include_str!("prompts/generate_request.md");
const VALIDATE_SYSTEM_TEMPLATE: &str = include_str!("prompts/validate_system.md");
const EVALUATE_SYSTEM_TEMPLATE: &str = include_str!("prompts/evaluate_system.md");
const EVALUATE_REQUEST_TEMPLATE: &str = include_str!("prompts/evaluate_request.md");

/// Context for one generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPromptInput<'a> {
    pub mode: GenerationMode,
    pub request: &'a str,
    pub prior_source: Option<&'a str>,
    pub transcript: Option<&'a str>,
    pub system_info: &'a str,
}

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("generate_system", GENERATE_SYSTEM_TEMPLATE),
            ("generate_request", GENERATE_REQUEST_TEMPLATE),
            ("validate_system", VALIDATE_SYSTEM_TEMPLATE),
            ("evaluate_system", EVALUATE_SYSTEM_TEMPLATE),
            ("evaluate_request", EVALUATE_REQUEST_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    /// System and user messages for a generation call.
    pub fn generation(&self, input: &GenerationPromptInput<'_>) -> Result<(String, String)> {
        let mode = input.mode.as_str();
        let system = self.render(
            "generate_system",
            context! {
                mode => mode,
                system_info => input.system_info.trim(),
            },
        )?;
        let user = self.render(
            "generate_request",
            context! {
                mode => mode,
                request => input.request.trim(),
                prior_source => input.prior_source.map(str::trim_end),
                transcript => input.transcript.map(str::trim_end).filter(|s| !s.is_empty()),
            },
        )?;
        Ok((system, user))
    }

    pub fn validation_system(&self) -> Result<String> {
        self.render("validate_system", context! {})
    }

    /// System and user messages for an evaluation call.
    pub fn evaluation(&self, request: &str, transcript: &str) -> Result<(String, String)> {
        let system = self.render("evaluate_system", context! {})?;
        let user = self.render(
            "evaluate_request",
            context! {
                request => request.trim(),
                transcript => Some(transcript.trim_end()).filter(|s| !s.is_empty()),
            },
        )?;
        Ok((system, user))
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("load prompt template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))
    }
}
