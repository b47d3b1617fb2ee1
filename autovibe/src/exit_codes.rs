//! Stable exit codes for the `autovibe` CLI.

use crate::core::terminal::Terminal;

/// Request satisfied, or the user quit before making one.
pub const OK: i32 = 0;
/// Fatal failure, invalid config, or an unattended run that ended in error.
pub const FATAL: i32 = 1;
/// The repair budget ran out.
pub const EXHAUSTED: i32 = 2;
/// Declined at the gate or interrupted.
pub const CANCELLED: i32 = 3;

pub fn for_terminal(terminal: &Terminal) -> i32 {
    match terminal {
        Terminal::Succeeded { .. } => OK,
        Terminal::Cancelled { .. } => CANCELLED,
        Terminal::Exhausted { .. } => EXHAUSTED,
        Terminal::Fatal { .. } => FATAL,
    }
}
