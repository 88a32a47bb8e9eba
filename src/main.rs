//! warden - sandboxed execution runtime for AI coding agents.
//!
//! The binary's job is small: launch the in-sandbox action execution server.
//! Everything interesting lives in `warden-core`.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden_core::config::RuntimeConfig;
use warden_core::server::{router, ServerState};

#[derive(Parser)]
#[command(name = "warden", version, about = "Sandboxed execution runtime for AI coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the action execution server inside the sandbox.
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Workspace directory all file operations are confined to.
        #[arg(long, default_value = "/workspace")]
        workspace: PathBuf,

        /// Shared secret required in the X-Session-API-Key header.
        /// When unset the check is disabled (trusted local dev only).
        #[arg(long, env = "SESSION_API_KEY")]
        api_key: Option<String>,

        #[arg(long, default_value = "/bin/bash")]
        shell: String,

        /// Default command timeout in seconds.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            host,
            port,
            workspace,
            api_key,
            shell,
            timeout_secs,
        } => {
            let config = RuntimeConfig {
                workspace_dir: workspace,
                shell,
                timeout_secs,
                ..RuntimeConfig::default()
            };
            let state = ServerState::new(&config, api_key);
            state.start().await?;

            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "execution server listening");

            let app = router(state.clone());
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;

            state.shutdown();
        }
    }
    Ok(())
}
