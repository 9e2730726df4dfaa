//! `gateway` binary: entry point for `G` (§6.5).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llm_gateway::config::Config;
use llm_gateway::db::Db;
use llm_gateway::providers::ProviderRegistry;
use llm_gateway::session::SessionManager;
use llm_gateway::{gateway, logs};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(llm_gateway::gateway_home);
    let config_path = args.config.unwrap_or_else(|| data_dir.join("config.yaml"));

    let mut config = Config::load(&config_path).await?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    logs::init_subscriber(&config.logging.level);

    let db = Arc::new(Db::open(&config.database_path(&data_dir))?);
    let registry = Arc::new(ProviderRegistry::new());
    let sessions = Arc::new(SessionManager::new(db.clone(), config.session.timeout_ms as i64));
    let _sweeper = sessions.spawn_sweeper(config.session.cleanup_interval_ms);

    let handle = gateway::start(db, registry, sessions, config).await?;
    tracing::info!(addr = %handle.addr, "gateway listening");

    shutdown_signal().await;
    tracing::info!("gateway shutting down");
    handle.task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
