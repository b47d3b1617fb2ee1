//! Generate, validate, execute and repair scripts from natural-language requests.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, risk gate, session
//!   state, terminal outcomes). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (artifact store, sandbox, completion
//!   backends, prompts, console). Isolated behind traits for tests.
//!
//! [`engine`] composes both into the per-request state machine; the
//! [`interactive`] and [`unattended`] drivers decide who answers its questions.

pub mod agents;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod interactive;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod unattended;
