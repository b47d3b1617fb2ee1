//! Terminal outcomes of a session and the per-step result.

use std::fmt;

/// Category of an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Generation or evaluation returned nothing (credentials, quota, schema).
    UpstreamCapability,
    /// Dependencies could not be installed in unattended mode.
    DependencyInstall,
    /// The isolated runtime could not be provisioned.
    Sandbox,
    /// The engine could not persist or read its own state.
    Internal,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UpstreamCapability => "upstream capability failure",
            Self::DependencyInstall => "dependency install failure",
            Self::Sandbox => "sandbox failure",
            Self::Internal => "internal failure",
        };
        f.write_str(label)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Succeeded { message: String },
    /// A human (or the gate) stopped the session before execution.
    Cancelled { reason: String },
    /// The repair budget ran out.
    Exhausted { retry_count: u32, max_retry: u32 },
    Fatal { kind: FatalKind, message: String },
}

impl Terminal {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// One-line explanation suitable for users and tool callers.
    pub fn describe(&self) -> String {
        match self {
            Self::Succeeded { message } => message.clone(),
            Self::Cancelled { reason } => format!("cancelled: {reason}"),
            Self::Exhausted {
                retry_count,
                max_retry,
            } => format!("gave up: retry budget exhausted ({retry_count} of {max_retry} repairs used)"),
            Self::Fatal { kind, message } => format!("{kind}: {message}"),
        }
    }
}

/// Result of one engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Loop again; the session's stage says what comes next.
    Continue,
    Finished(Terminal),
}
