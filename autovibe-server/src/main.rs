//! autovibe server - stateless HTTP front-end running one session per request.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use autovibe::io::config::{DEFAULT_CONFIG_PATH, load_config};
use autovibe::logging;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "autovibe-server")]
#[command(about = "HTTP endpoint that generates, reviews and runs scripts unattended")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "51551")]
    port: u16,

    /// Config file; defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(logging::env_filter("warn,autovibe_server=info"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let cfg = load_config(&args.config)?;
    info!(
        scripts_dir = %cfg.scripts_dir.display(),
        backend = ?cfg.backend.kind,
        "starting autovibe-server"
    );
    let state = AppState::from_config(cfg)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
