//! Process supervisor (§4.7): owns the lifecycle of the bridge (`W`) and
//! gateway (`G`) child processes on behalf of the control plane.
//!
//! Grounded on the teacher's `exec_shell` background-process registry:
//! a `Mutex`-guarded table of tracked children, `kill_on_drop(true)` so a
//! supervisor crash never orphans a child, and a liveness probe via
//! signal 0.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Partial,
    Running,
    Stopping,
    Error,
}

struct TrackedChild {
    child: Child,
    pid: u32,
    started_at: Instant,
}

struct Inner {
    state: SupervisorState,
    bridge: Option<TrackedChild>,
    gateway: Option<TrackedChild>,
}

/// Owns `G` and `W` for one control-plane process. One instance per
/// process; never cloned (the children it tracks are process-unique).
pub struct ChildSupervisor {
    inner: Mutex<Inner>,
    bridge_exe: PathBuf,
    gateway_exe: PathBuf,
    config: Config,
    data_dir: PathBuf,
    last_error: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SupervisorState,
    pub bridge_pid: Option<u32>,
    pub gateway_pid: Option<u32>,
    pub bridge_uptime_secs: Option<u64>,
    pub gateway_uptime_secs: Option<u64>,
}

impl ChildSupervisor {
    /// `data_dir` holds the pid files this supervisor uses to reclaim a
    /// child's port after a crash — its own, not the child's (§4.7 step 1).
    pub fn new(bridge_exe: PathBuf, gateway_exe: PathBuf, config: Config, data_dir: PathBuf) -> Self {
        let _ = std::fs::create_dir_all(&data_dir);
        Self {
            inner: Mutex::new(Inner { state: SupervisorState::Stopped, bridge: None, gateway: None }),
            bridge_exe,
            gateway_exe,
            config,
            data_dir,
            last_error: AtomicI64::new(0),
        }
    }

    fn pid_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.pid"))
    }

    /// Kill whatever process a prior run of this supervisor left bound to
    /// `port` before spawning a replacement (§4.7 step 1). A supervisor
    /// that crashed without running its own `stop()` leaves its child's
    /// pid on disk for exactly this reason — `kill_on_drop` only protects
    /// against the supervisor's own graceful exit, not a crash.
    async fn reclaim_port(&self, pid_file: &Path, port: u16) {
        if let Ok(raw) = std::fs::read_to_string(pid_file) {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                if is_alive(pid) {
                    warn!(pid, port, "supervisor: killing stale owner of port from a prior run");
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                    let deadline = Instant::now() + Duration::from_secs(2);
                    while is_alive(pid) && Instant::now() < deadline {
                        sleep(Duration::from_millis(100)).await;
                    }
                    if is_alive(pid) {
                        warn!(pid, "supervisor: stale owner ignored SIGTERM, sending SIGKILL");
                        unsafe {
                            libc::kill(pid as i32, libc::SIGKILL);
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(pid_file);
        }

        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}")).await.is_ok() {
            warn!(port, "supervisor: port is still occupied by an unmanaged process, spawn may fail to bind");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("supervisor mutex poisoned")
    }

    /// Start sequence (§4.7): spawn `W`, poll readiness up to 15s, then
    /// spawn `G` unconditionally so the gateway comes up even if the
    /// bridge never becomes healthy.
    pub async fn start(&self) -> anyhow::Result<StatusSnapshot> {
        {
            let mut inner = self.lock();
            if matches!(inner.state, SupervisorState::Running | SupervisorState::Partial | SupervisorState::Starting) {
                drop(inner);
                return Ok(self.status());
            }
            inner.state = SupervisorState::Starting;
        }
        info!("supervisor: starting children");

        let bridge_pid_file = self.pid_file("bridge");
        self.reclaim_port(&bridge_pid_file, self.config.server.bridge_port).await;
        let bridge = spawn_child(&self.bridge_exe, &self.config, self.config.server.bridge_port)?;
        let _ = std::fs::write(&bridge_pid_file, bridge.pid.to_string());
        {
            let mut inner = self.lock();
            inner.bridge = Some(bridge);
        }

        let bridge_ready = self.poll_ready(self.config.server.bridge_port, Duration::from_secs(15)).await;
        if !bridge_ready {
            warn!("supervisor: bridge did not become ready within 15s, starting gateway anyway");
        }

        let gateway_pid_file = self.pid_file("gateway");
        self.reclaim_port(&gateway_pid_file, self.config.server.port).await;
        let gateway = spawn_child(&self.gateway_exe, &self.config, self.config.server.port)?;
        let _ = std::fs::write(&gateway_pid_file, gateway.pid.to_string());
        {
            let mut inner = self.lock();
            inner.gateway = Some(gateway);
        }

        let gateway_ready = self.poll_ready(self.config.server.port, Duration::from_secs(15)).await;

        let mut inner = self.lock();
        inner.state = if bridge_ready && gateway_ready {
            SupervisorState::Running
        } else if gateway_ready {
            SupervisorState::Partial
        } else {
            SupervisorState::Error
        };
        info!(state = ?inner.state, "supervisor: start sequence complete");
        drop(inner);
        Ok(self.status())
    }

    async fn poll_ready(&self, port: u16, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        let addr = format!("127.0.0.1:{port}");
        while Instant::now() < deadline {
            if tokio::net::TcpStream::connect(&addr).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(500)).await;
        }
        false
    }

    /// Stop sequence (§4.7): graceful signal, 2s grace, then force-kill.
    pub async fn stop(&self) -> anyhow::Result<StatusSnapshot> {
        {
            let mut inner = self.lock();
            inner.state = SupervisorState::Stopping;
        }
        info!("supervisor: stopping children");

        let (bridge, gateway) = {
            let mut inner = self.lock();
            (inner.bridge.take(), inner.gateway.take())
        };

        for tracked in [bridge, gateway].into_iter().flatten() {
            stop_one(tracked).await;
        }
        let _ = std::fs::remove_file(self.pid_file("bridge"));
        let _ = std::fs::remove_file(self.pid_file("gateway"));

        let mut inner = self.lock();
        inner.state = SupervisorState::Stopped;
        drop(inner);
        Ok(self.status())
    }

    /// Liveness probe + dead-handle cleanup, then a status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        let mut inner = self.lock();

        let bridge_alive = inner.bridge.as_ref().map(|t| is_alive(t.pid)).unwrap_or(false);
        if let Some(t) = &inner.bridge {
            if !bridge_alive {
                warn!(pid = t.pid, "supervisor: bridge process is gone, clearing handle");
                inner.bridge = None;
            }
        }
        let gateway_alive = inner.gateway.as_ref().map(|t| is_alive(t.pid)).unwrap_or(false);
        if let Some(t) = &inner.gateway {
            if !gateway_alive {
                warn!(pid = t.pid, "supervisor: gateway process is gone, clearing handle");
                inner.gateway = None;
            }
        }

        if inner.state == SupervisorState::Running && !(bridge_alive && gateway_alive) {
            inner.state = if gateway_alive { SupervisorState::Partial } else { SupervisorState::Error };
        }

        StatusSnapshot {
            state: inner.state,
            bridge_pid: inner.bridge.as_ref().map(|t| t.pid),
            gateway_pid: inner.gateway.as_ref().map(|t| t.pid),
            bridge_uptime_secs: inner.bridge.as_ref().map(|t| t.started_at.elapsed().as_secs()),
            gateway_uptime_secs: inner.gateway.as_ref().map(|t| t.started_at.elapsed().as_secs()),
        }
    }

    /// Record the wall-clock seconds of the last observed failure, for
    /// diagnostics surfaced via `/api/proxy/status`. Currently unused by
    /// any handler but kept available for the next status-detail pass.
    pub fn note_error(&self) {
        self.last_error.store(crate::utils::now_secs(), Ordering::Relaxed);
    }
}

fn spawn_child(exe: &PathBuf, config: &Config, port: u16) -> anyhow::Result<TrackedChild> {
    let mut cmd = Command::new(exe);
    cmd.env("PORT", port.to_string())
        .env("LOG_LEVEL", &config.logging.level)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| anyhow::anyhow!("spawn {}: {e}", exe.display()))?;
    let pid = child.id().ok_or_else(|| anyhow::anyhow!("spawned child has no pid"))?;
    info!(pid, exe = %exe.display(), "supervisor: spawned child");
    Ok(TrackedChild { child, pid, started_at: Instant::now() })
}

async fn stop_one(mut tracked: TrackedChild) {
    unsafe {
        libc::kill(tracked.pid as i32, libc::SIGTERM);
    }
    let graceful = tokio::time::timeout(Duration::from_secs(2), tracked.child.wait()).await;
    if graceful.is_err() {
        warn!(pid = tracked.pid, "supervisor: graceful stop timed out, force-killing");
        let _ = tracked.child.kill().await;
    }
}

/// Signal-0 liveness check: `ESRCH` means dead, `EPERM` still means alive.
fn is_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as i32, 0) };
    if rc == 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    err.raw_os_error() == Some(libc::EPERM)
}
