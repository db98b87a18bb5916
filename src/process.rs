use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Configuration for spawning a managed service process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub log_prefix: String,
    pub env: Vec<(String, String)>,
}

/// A long-running child service. Output is streamed line-by-line into the
/// supervisor's log with the service prefix.
pub struct ServiceProcess {
    pub name: String,
    pub pid: u32,
    child: Child,
}

/// Spawn a service child in its own process group and stream its output.
pub fn spawn_streaming(name: &str, config: SpawnConfig) -> Result<ServiceProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;

    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            info!("[{prefix_out}] {line}");
        }
    });

    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            warn!("[{prefix_err}] {line}");
        }
    });

    Ok(ServiceProcess {
        name: name.to_string(),
        pid,
        child,
    })
}

impl ServiceProcess {
    /// Non-blocking liveness check.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM the process group, wait up to `grace`, then SIGKILL.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        signal_group(self.pid, libc::SIGTERM);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    "[sentimesh:process] {} stopped ({})",
                    self.name,
                    status.code().unwrap_or(-1)
                );
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Process(format!("wait error for {}: {e}", self.name))),
            Err(_) => {
                warn!(
                    "[sentimesh:process] {} didn't stop gracefully, forcing",
                    self.name
                );
                signal_group(self.pid, libc::SIGKILL);
                let _ = self.child.wait().await;
                Ok(())
            }
        }
    }
}

/// Send a signal to a process group by leader pid.
pub fn signal_group(pid: u32, signal: i32) {
    unsafe {
        libc::killpg(pid as i32, signal);
    }
}

/// Whether a pid still refers to a live process.
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
