//! `bridge` binary: entry point for `W` (§6.5).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llm_gateway::bridge;
use llm_gateway::config::Config;
use llm_gateway::db::Db;
use llm_gateway::logs;

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
        config.server.bridge_port = port;
    }

    logs::init_subscriber(&config.logging.level);

    let db = Arc::new(Db::open(&config.database_path(&data_dir))?);
    let handle = bridge::start(db, config).await?;
    tracing::info!(addr = %handle.addr, "bridge listening");

    shutdown_signal().await;
    tracing::info!("bridge shutting down");
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
