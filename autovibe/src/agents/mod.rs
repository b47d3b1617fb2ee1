//! The three opaque capabilities, each expressed as one structured completion.
//!
//! Agents own their prompt templates and response schemas; the engine only
//! sees domain types.

use std::path::PathBuf;

use serde_json::Value;

use crate::io::config::BackendConfig;

pub mod evaluator;
pub mod generator;
pub mod validator;

pub use evaluator::EvaluatorAgent;
pub use generator::{GenerationInput, GeneratorAgent};
pub use validator::ValidatorAgent;

/// Parse an embedded response schema.
pub(crate) fn embedded_schema(raw: &str) -> Value {
    serde_json::from_str(raw).expect("embedded schema should be valid json")
}

/// Agents configured for one backend.
#[derive(Debug)]
pub struct Agents {
    pub generator: GeneratorAgent,
    pub validator: ValidatorAgent,
    pub evaluator: EvaluatorAgent,
}

impl Agents {
    /// `interpreter` is the sandbox python, described to the generator.
    pub fn new(backend: &BackendConfig, interpreter: PathBuf) -> Self {
        Self {
            generator: GeneratorAgent::new(&backend.generate_model, interpreter),
            validator: ValidatorAgent::new(&backend.validate_model),
            evaluator: EvaluatorAgent::new(&backend.validate_model),
        }
    }
}
