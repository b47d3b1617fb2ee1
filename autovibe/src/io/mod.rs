//! Side-effecting adapters: filesystem, child processes, network, console.

pub mod artifact_store;
pub mod codex;
pub mod completion;
pub mod config;
pub mod console;
pub mod openai;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod system_info;
