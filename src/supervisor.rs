use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{Config, CoordinationMode};
use crate::error::{Error, Result};
use crate::process::{self, ServiceProcess, SpawnConfig};
use crate::state::{ManagedService, StateManager};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SPAWN_SETTLE: Duration = Duration::from_millis(300);

/// One service the supervisor manages: the configured departments plus the
/// coordinator, which always starts last.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub port: u16,
}

pub fn service_specs(config: &Config) -> Result<Vec<ServiceSpec>> {
    let mut specs = Vec::with_capacity(config.agent_types.len() + 1);
    for kind in &config.agent_types {
        let port = config.ports.for_agent(*kind).ok_or_else(|| {
            Error::Supervisor(format!("no port configured for {kind}"))
        })?;
        specs.push(ServiceSpec {
            name: kind.as_str().to_string(),
            port,
        });
    }
    specs.push(ServiceSpec {
        name: "coordinator".to_string(),
        port: config.ports.coordinator,
    });
    Ok(specs)
}

pub fn port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Start every service as a child process and supervise until SIGINT or a
/// child dies. Returns the process exit code: 130 after a clean SIGINT
/// shutdown, 1 on startup failure or unexpected child exit.
pub async fn up(
    config: &Config,
    config_path: Option<&str>,
    state_mgr: &StateManager,
) -> Result<i32> {
    let specs = service_specs(config)?;

    // Prune registry entries left by a crashed supervisor; whatever is
    // still alive belongs to a running one.
    let leftover = state_mgr.reconcile(process::pid_alive)?;
    if !leftover.is_empty() {
        error!(
            "[sentimesh:supervisor] {} recorded service(s) still running, run `stop` first",
            leftover.len()
        );
        return Ok(1);
    }

    for spec in &specs {
        if !port_available(spec.port) {
            error!(
                "[sentimesh:supervisor] port {} already in use for {}",
                spec.port, spec.name
            );
            return Ok(1);
        }
    }

    let exe = std::env::current_exe()
        .map_err(|e| Error::Supervisor(format!("cannot locate own binary: {e}")))?;

    let mut children: Vec<(ServiceSpec, ServiceProcess)> = Vec::with_capacity(specs.len());
    for spec in &specs {
        let mut args = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.to_string());
        }
        args.extend([
            "serve".to_string(),
            spec.name.clone(),
            "--port".to_string(),
            spec.port.to_string(),
        ]);
        if spec.name == "coordinator" && config.coordinator_mode == CoordinationMode::A2a {
            args.push("--a2a".to_string());
        }

        let mut child = process::spawn_streaming(
            &spec.name,
            SpawnConfig {
                command: exe.display().to_string(),
                args,
                log_prefix: format!("sentimesh:{}", spec.name),
                env: vec![],
            },
        )?;

        tokio::time::sleep(SPAWN_SETTLE).await;
        if !child.is_running() {
            error!(
                "[sentimesh:supervisor] {} failed to start on port {}",
                spec.name, spec.port
            );
            let _ = child.terminate(SHUTDOWN_GRACE).await;
            shutdown_all(children).await;
            return Ok(1);
        }

        info!(
            "[sentimesh:supervisor] {} started on port {} (pid {})",
            spec.name, spec.port, child.pid
        );
        children.push((spec.clone(), child));
    }

    state_mgr.record_services(
        children
            .iter()
            .map(|(spec, child)| ManagedService {
                name: spec.name.clone(),
                pid: child.pid,
                port: spec.port,
            })
            .collect(),
    )?;

    info!(
        "[sentimesh:supervisor] all {} services up, ctrl-c to stop",
        children.len()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[sentimesh:supervisor] SIGINT received, shutting down...");
                shutdown_all(children).await;
                state_mgr.clear()?;
                return Ok(130);
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                let mut dead: Option<String> = None;
                for (spec, child) in children.iter_mut() {
                    if !child.is_running() {
                        dead = Some(spec.name.clone());
                        break;
                    }
                }
                if let Some(name) = dead {
                    error!("[sentimesh:supervisor] {name} exited unexpectedly, stopping all");
                    shutdown_all(children).await;
                    state_mgr.clear()?;
                    return Ok(1);
                }
            }
        }
    }
}

/// Stop children in reverse start order (coordinator first).
async fn shutdown_all(children: Vec<(ServiceSpec, ServiceProcess)>) {
    for (spec, child) in children.into_iter().rev() {
        if let Err(e) = child.terminate(SHUTDOWN_GRACE).await {
            warn!("[sentimesh:supervisor] failed to stop {}: {e}", spec.name);
        }
    }
}

/// Probe every configured service's /health. Returns the exit code:
/// 0 iff all are healthy.
pub fn health_check(config: &Config) -> Result<i32> {
    let specs = service_specs(config)?;
    let mut all_healthy = true;

    for spec in &specs {
        let url = format!("http://{}:{}/health", config.host, spec.port);
        match ureq::get(&url)
            .timeout(Duration::from_secs(5))
            .call()
        {
            Ok(response) => match response.into_json::<serde_json::Value>() {
                Ok(body) if body["status"] == "healthy" => {
                    info!(
                        "[sentimesh:supervisor] {} healthy on port {}",
                        spec.name, spec.port
                    );
                }
                _ => {
                    warn!(
                        "[sentimesh:supervisor] {} returned an unhealthy response",
                        spec.name
                    );
                    all_healthy = false;
                }
            },
            Err(e) => {
                warn!(
                    "[sentimesh:supervisor] {} not responding on port {}: {e}",
                    spec.name, spec.port
                );
                all_healthy = false;
            }
        }
    }

    Ok(if all_healthy { 0 } else { 1 })
}

/// Terminate every service recorded by a previous `up`.
pub async fn stop(state_mgr: &StateManager) -> Result<i32> {
    let state = state_mgr.load();
    if state.services.is_empty() {
        info!("[sentimesh:supervisor] no recorded services to stop");
        return Ok(0);
    }

    for service in &state.services {
        if process::pid_alive(service.pid) {
            info!(
                "[sentimesh:supervisor] stopping {} (pid {})",
                service.name, service.pid
            );
            process::signal_group(service.pid, libc::SIGTERM);
        } else {
            info!(
                "[sentimesh:supervisor] {} (pid {}) already stopped",
                service.name, service.pid
            );
        }
    }

    // Give processes the grace window, then force anything still alive.
    let deadline = std::time::Instant::now() + SHUTDOWN_GRACE;
    while std::time::Instant::now() < deadline {
        if state.services.iter().all(|s| !process::pid_alive(s.pid)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    for service in &state.services {
        if process::pid_alive(service.pid) {
            warn!(
                "[sentimesh:supervisor] {} (pid {}) didn't stop gracefully, forcing",
                service.name, service.pid
            );
            process::signal_group(service.pid, libc::SIGKILL);
        }
    }

    state_mgr.clear()?;
    Ok(0)
}
