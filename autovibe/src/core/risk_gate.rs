//! Execution gate: decides whether a validated artifact may run.
//!
//! `decide` is total over `(verdict, ceiling, mode)` and has no I/O. Callers
//! act on the decision; the gate never executes or prompts itself.

use crate::core::types::{RiskLevel, ValidationVerdict};

/// Whether a human is available to answer gate questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Unattended,
}

/// Why the gate refused execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// The validator believes the code is broken or off-request.
    Incorrect,
    /// Unattended run whose risk is not strictly below the configured ceiling.
    RiskNotBelowCeiling {
        risk: RiskLevel,
        ceiling: RiskLevel,
    },
}

impl RefusalReason {
    pub fn describe(self) -> String {
        match self {
            Self::Incorrect => "validator marked the code as incorrect".to_string(),
            Self::RiskNotBelowCeiling { risk, ceiling } => format!(
                "risk {risk} is not below the configured ceiling {ceiling} and no human is available to review it"
            ),
        }
    }
}

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Run without asking.
    Proceed,
    /// Ask a human first. `dangerous` is set for `DENY` verdicts.
    Ask { dangerous: bool },
    Refuse(RefusalReason),
}

/// Classify a verdict under the given ceiling and mode.
///
/// - Incorrect code is refused in every mode.
/// - Interactive: `ALLOW` proceeds, `CHECK`/`DENY` ask (the ceiling is not consulted).
/// - Unattended: proceed only when `risk < ceiling`; anything else would need a
///   human, so it is refused.
pub fn decide(verdict: &ValidationVerdict, ceiling: RiskLevel, mode: Mode) -> GateDecision {
    if !verdict.is_correct {
        return GateDecision::Refuse(RefusalReason::Incorrect);
    }
    match mode {
        Mode::Interactive => match verdict.risk {
            RiskLevel::Allow => GateDecision::Proceed,
            RiskLevel::Check => GateDecision::Ask { dangerous: false },
            RiskLevel::Deny => GateDecision::Ask { dangerous: true },
        },
        Mode::Unattended => {
            if verdict.risk < ceiling {
                GateDecision::Proceed
            } else {
                GateDecision::Refuse(RefusalReason::RiskNotBelowCeiling {
                    risk: verdict.risk,
                    ceiling,
                })
            }
        }
    }
}
