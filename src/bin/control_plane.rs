//! `control-plane` binary: entry point for the operator-facing control
//! plane, which also owns the `G`/`W` process supervisor (§4.7, §6.5).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llm_gateway::config::Config;
use llm_gateway::db::Db;
use llm_gateway::logs;
use llm_gateway::providers::ProviderRegistry;
use llm_gateway::supervisor::ChildSupervisor;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
}

fn sibling_exe(name: &str) -> anyhow::Result<PathBuf> {
    let mut path = std::env::current_exe()?;
    path.set_file_name(name);
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(llm_gateway::gateway_home);
    let config_path = args.config.unwrap_or_else(|| data_dir.join("config.yaml"));

    let mut config = Config::load(&config_path).await?;
    if let Some(port) = args.port {
        config.server.control_plane_port = port;
    }

    logs::init_subscriber(&config.logging.level);

    let db = Arc::new(Db::open(&config.database_path(&data_dir))?);
    llm_gateway::config::apply_bootstrap(&config, &db)?;
    let registry = Arc::new(ProviderRegistry::new());

    let bridge_exe = sibling_exe(&bin_name("bridge"))?;
    let gateway_exe = sibling_exe(&bin_name("gateway"))?;
    let supervisor = Arc::new(ChildSupervisor::new(bridge_exe, gateway_exe, config.clone(), data_dir.clone()));

    let handle = llm_gateway::control_plane::start(db, registry, supervisor.clone(), config).await?;
    tracing::info!(addr = %handle.addr, "control plane listening");

    shutdown_signal().await;
    tracing::info!("control plane shutting down");

    let stop = tokio::time::timeout(std::time::Duration::from_secs(10), supervisor.stop()).await;
    if stop.is_err() {
        tracing::warn!("supervisor stop sequence exceeded 10s grace period, exiting anyway");
    }

    handle.task.abort();
    Ok(())
}

#[cfg(windows)]
fn bin_name(stem: &str) -> String {
    format!("{stem}.exe")
}

#[cfg(not(windows))]
fn bin_name(stem: &str) -> String {
    stem.to_string()
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
