//! Development-time tracing.
//!
//! Tracing is diagnostics only: it goes to stderr and is filtered by
//! `AUTOVIBE_LOG` (or `RUST_LOG` when that is unset). Prompts, progress lines
//! and the tool JSON result are product output on stdout and do not depend on
//! it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "AUTOVIBE_LOG";

const CLI_DEFAULT_DIRECTIVES: &str = "warn";

/// Initialize the tracing subscriber for the CLI.
///
/// Defaults to `warn`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// AUTOVIBE_LOG=autovibe=debug autovibe tool "list files in current directory"
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter(CLI_DEFAULT_DIRECTIVES))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Filter from `AUTOVIBE_LOG`, then `RUST_LOG`, then `default`.
///
/// Blank or unparsable values fall through to the next source.
pub fn env_filter(default: &str) -> EnvFilter {
    filter_from(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        default,
    )
}

fn filter_from(own: Option<String>, rust_log: Option<String>, default: &str) -> EnvFilter {
    [own, rust_log]
        .into_iter()
        .flatten()
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}
