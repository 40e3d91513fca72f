use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dh_domain::config::ConfigManager;
use dh_resource_manager::{cleanup_orphaned_resources, CombinedSessionRegistry, InstanceTracker};
use dh_systems_server::{server, ToolContext};

#[derive(Debug, Parser)]
#[command(
    name = "dh-mcp-systems-server",
    about = "Deephaven MCP systems server",
    version
)]
struct Cli {
    /// Path to the configuration document; defaults to $DH_MCP_CONFIG_FILE.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON-RPC wire; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!("deephaven-mcp systems server starting");

    // Reap whatever dead instances left behind before registering ourselves.
    cleanup_orphaned_resources().await;

    let instance_tracker = match InstanceTracker::create_and_register().await {
        Ok(tracker) => Some(Arc::new(tracker)),
        Err(e) => {
            tracing::warn!(error = %e, "instance registration failed; orphan tracking disabled");
            None
        }
    };

    let config_manager = Arc::new(match cli.config {
        Some(path) => ConfigManager::with_config_path(path),
        None => ConfigManager::new(),
    });

    let session_registry = Arc::new(CombinedSessionRegistry::new(instance_tracker.clone()));
    session_registry.initialize(&config_manager).await?;

    let context = ToolContext::new(
        config_manager,
        session_registry.clone(),
        instance_tracker.clone(),
    );

    let served = tokio::select! {
        result = server::serve(context) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    // Shutdown contract: unregister the instance record, then close the
    // registry (which closes each manager and stops owned subprocesses).
    if let Some(tracker) = &instance_tracker {
        tracker.unregister().await;
    }
    if let Err(e) = session_registry.close().await {
        tracing::warn!(error = %e, "error closing session registry during shutdown");
    }

    served?;
    tracing::info!("deephaven-mcp systems server stopped");
    Ok(())
}
