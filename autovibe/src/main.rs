//! `autovibe`: turn a request into a script, review it, run it, repair it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use autovibe::agents::Agents;
use autovibe::core::types::RiskLevel;
use autovibe::engine::Collaborators;
use autovibe::exit_codes;
use autovibe::interactive::run_interactive;
use autovibe::io::artifact_store::ArtifactStore;
use autovibe::io::completion::{StructuredCompletion, backend_from_config};
use autovibe::io::config::{
    AutovibeConfig, DEFAULT_CONFIG_PATH, PolicyOverrides, load_config, write_config,
};
use autovibe::io::console;
use autovibe::io::sandbox::{ScriptRuntime, VenvSandbox};
use autovibe::logging;
use autovibe::unattended::run_tool;

#[derive(Parser)]
#[command(
    name = "autovibe",
    version,
    about = "Generate, review, run and repair scripts from natural-language requests"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask for a request and work on it interactively (default).
    Repl(ReplArgs),
    /// Run one request unattended and print the JSON result.
    Tool(ToolArgs),
    /// Write a config file with the default settings.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Default)]
struct ReplArgs {
    /// Repair attempts after the first generation.
    #[arg(long)]
    max_retry: Option<u32>,
    /// Let the evaluator decide success instead of asking.
    #[arg(long)]
    auto_check: bool,
    /// Seconds before a running script is killed.
    #[arg(long)]
    exec_timeout: Option<u64>,
}

impl ReplArgs {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            max_retry: self.max_retry,
            max_risk_level: None,
            auto_check: self.auto_check.then_some(true),
            exec_timeout_secs: self.exec_timeout,
        }
    }
}

/// Flags left out keep the value from the config file.
#[derive(Args)]
struct ToolArgs {
    /// What the script should do.
    request: String,
    /// Repair attempts after the first generation.
    #[arg(long)]
    max_retry: Option<u32>,
    /// Let the evaluator decide success; otherwise a clean exit counts.
    #[arg(long)]
    auto_check: bool,
    /// Seconds before a running script is killed.
    #[arg(long)]
    exec_timeout: Option<u64>,
    /// Unattended runs execute only below this level (ALLOW, CHECK, DENY).
    #[arg(long)]
    max_risk_level: Option<RiskLevel>,
}

impl ToolArgs {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            max_retry: self.max_retry,
            max_risk_level: self.max_risk_level,
            auto_check: self.auto_check.then_some(true),
            exec_timeout_secs: self.exec_timeout,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Init { force }) => cmd_init(&cli.config, force),
        Some(Command::Tool(args)) => cmd_tool(&cli.config, args),
        Some(Command::Repl(args)) => cmd_repl(&cli.config, args),
        None => cmd_repl(&cli.config, ReplArgs::default()),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &AutovibeConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_repl(config_path: &Path, args: ReplArgs) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let policy = args.overrides().apply(cfg.policy());
    policy.validate().context("invalid options")?;

    let stack = Stack::open(&cfg)?;
    let terminal = run_interactive(console::stdio(), stack.collaborators(), policy)?;
    Ok(terminal.as_ref().map_or(exit_codes::OK, exit_codes::for_terminal))
}

fn cmd_tool(config_path: &Path, args: ToolArgs) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let policy = args.overrides().apply(cfg.policy());

    let stack = Stack::open(&cfg)?;
    let result = run_tool(stack.collaborators(), &args.request, policy);
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize tool result")?
    );
    if result.is_error {
        eprintln!("{}", result.content);
        return Ok(exit_codes::FATAL);
    }
    Ok(exit_codes::OK)
}

/// Collaborators built from one config.
struct Stack {
    store: ArtifactStore,
    sandbox: VenvSandbox,
    agents: Agents,
    completion: Box<dyn StructuredCompletion>,
}

impl Stack {
    fn open(cfg: &AutovibeConfig) -> Result<Self> {
        let store = ArtifactStore::open(&cfg.scripts_dir)?;
        let sandbox = VenvSandbox::from_config(cfg);
        let agents = Agents::new(&cfg.backend, sandbox.interpreter());
        let completion = backend_from_config(cfg, &cfg.scripts_dir)?;
        debug!(scripts_dir = %cfg.scripts_dir.display(), backend = ?cfg.backend.kind, "collaborators ready");
        Ok(Self {
            store,
            sandbox,
            agents,
            completion,
        })
    }

    fn collaborators(&self) -> Collaborators<'_, dyn StructuredCompletion, VenvSandbox> {
        Collaborators {
            completion: self.completion.as_ref(),
            runtime: &self.sandbox,
            store: &self.store,
            agents: &self.agents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_repl() {
        let cli = Cli::parse_from(["autovibe"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn omitted_tool_flags_keep_config_policy() {
        let cli = Cli::parse_from(["autovibe", "tool", "list files"]);
        let Some(Command::Tool(args)) = cli.command else {
            panic!("expected tool command");
        };
        assert_eq!(args.request, "list files");

        let cfg = AutovibeConfig {
            max_retry: 5,
            max_risk_level: RiskLevel::Check,
            auto_check: true,
            exec_timeout_secs: 30,
            ..AutovibeConfig::default()
        };
        assert_eq!(args.overrides().apply(cfg.policy()), cfg.policy());
    }

    #[test]
    fn tool_flags_override_config_policy() {
        let cli = Cli::parse_from([
            "autovibe",
            "tool",
            "x",
            "--max-retry",
            "1",
            "--exec-timeout",
            "9",
        ]);
        let Some(Command::Tool(args)) = cli.command else {
            panic!("expected tool command");
        };
        let cfg = AutovibeConfig {
            max_retry: 5,
            ..AutovibeConfig::default()
        };
        let policy = args.overrides().apply(cfg.policy());
        assert_eq!(policy.max_retry, 1);
        assert_eq!(policy.exec_timeout, std::time::Duration::from_secs(9));
        assert_eq!(policy.max_risk_level, cfg.max_risk_level);
        assert!(!policy.auto_check);
    }

    #[test]
    fn omitted_repl_flags_keep_config_policy() {
        let cfg = AutovibeConfig {
            max_retry: 4,
            auto_check: true,
            ..AutovibeConfig::default()
        };
        assert_eq!(ReplArgs::default().overrides().apply(cfg.policy()), cfg.policy());
    }

    #[test]
    fn tool_accepts_risk_level_case_insensitively() {
        let cli = Cli::parse_from([
            "autovibe",
            "--config",
            "other.toml",
            "tool",
            "x",
            "--max-risk-level",
            "check",
            "--auto-check",
        ]);
        let Some(Command::Tool(args)) = cli.command else {
            panic!("expected tool command");
        };
        assert_eq!(args.max_risk_level, Some(RiskLevel::Check));
        assert!(args.auto_check);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn init_force_flag() {
        let cli = Cli::parse_from(["autovibe", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }
}
