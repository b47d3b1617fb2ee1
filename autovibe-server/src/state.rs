//! Shared application state for the HTTP front-end.

use std::sync::Arc;

use anyhow::Result;
use autovibe::agents::Agents;
use autovibe::core::session::Policy;
use autovibe::engine::Collaborators;
use autovibe::io::artifact_store::ArtifactStore;
use autovibe::io::completion::{StructuredCompletion, backend_from_config};
use autovibe::io::config::AutovibeConfig;
use autovibe::io::sandbox::{ScriptRuntime, VenvSandbox};
use autovibe::unattended::{ToolReturn, run_tool};

/// Builds a completion backend for one request.
///
/// Called on the blocking thread that runs the session, so backends with
/// their own runtime (the blocking HTTP client) never touch the async one.
pub type CompletionFactory =
    Arc<dyn Fn() -> Result<Box<dyn StructuredCompletion>> + Send + Sync>;

/// Shared state accessible from all request handlers.
///
/// Sessions are never shared: every request builds its own.
#[derive(Clone)]
pub struct AppState {
    pub store: ArtifactStore,
    /// One isolated environment for all requests.
    pub runtime: Arc<dyn ScriptRuntime + Send + Sync>,
    pub agents: Arc<Agents>,
    pub completion: CompletionFactory,
    /// Policy from the config file; request fields override it.
    pub policy: Policy,
}

impl AppState {
    pub fn from_config(cfg: AutovibeConfig) -> Result<Self> {
        let store = ArtifactStore::open(&cfg.scripts_dir)?;
        let sandbox = VenvSandbox::from_config(&cfg);
        let agents = Agents::new(&cfg.backend, sandbox.interpreter());
        let policy = cfg.policy();
        let completion: CompletionFactory =
            Arc::new(move || backend_from_config(&cfg, &cfg.scripts_dir));
        Ok(Self {
            store,
            runtime: Arc::new(sandbox),
            agents: Arc::new(agents),
            completion,
            policy,
        })
    }

    /// Run one request to completion. Blocks.
    pub fn run(&self, request: &str, policy: Policy) -> Result<ToolReturn> {
        let completion = (self.completion)()?;
        let collab = Collaborators {
            completion: completion.as_ref(),
            runtime: self.runtime.as_ref(),
            store: &self.store,
            agents: self.agents.as_ref(),
        };
        Ok(run_tool(collab, request, policy))
    }
}
