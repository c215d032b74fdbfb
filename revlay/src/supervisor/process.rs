//! Service start/stop with PID tracking and signal escalation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::RevlayError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Config;
use crate::supervisor::pidfile::{PidFile, ProcessRecord};
use crate::template::{self, TemplateVars};

/// Interval between liveness checks while waiting for an exit
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Error log lines included in a start failure
const ERROR_TAIL_LINES: usize = 20;

/// True if `pid` exists and is not a zombie
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // Field 3, after the parenthesised command name
    stat.rfind(')')
        .and_then(|i| stat[i + 1..].split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

/// Deliver `sig` to the process group led by `pid`, falling back to the pid
pub fn send_signal(pid: u32, sig: Signal) -> Result<(), RevlayError> {
    let raw = i32::try_from(pid)
        .map_err(|_| RevlayError::ProcessError(format!("pid {} out of range", pid)))?;
    let target = Pid::from_raw(raw);

    if signal::killpg(target, sig).is_ok() {
        debug!(pid, signal = %sig, "Signalled process group");
        return Ok(());
    }
    match signal::kill(target, sig) {
        Ok(()) | Err(Errno::ESRCH) => {
            debug!(pid, signal = %sig, "Signalled process");
            Ok(())
        }
        Err(e) => Err(RevlayError::ProcessError(format!(
            "failed to send {} to {}: {}",
            sig, pid, e
        ))),
    }
}

/// SIGTERM, wait up to `timeout`, then SIGKILL.
///
/// Returns true when the kill was forced.
pub async fn terminate(pid: u32, timeout: Duration) -> Result<bool, RevlayError> {
    if !is_alive(pid) {
        return Ok(false);
    }

    send_signal(pid, Signal::SIGTERM)?;
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            info!(pid, "Process exited after SIGTERM");
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if !is_alive(pid) {
        return Ok(false);
    }

    warn!(pid, "Process still alive after {:?}, sending SIGKILL", timeout);
    send_signal(pid, Signal::SIGKILL)?;
    for _ in 0..10 {
        if !is_alive(pid) {
            return Ok(true);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Err(RevlayError::ProcessError(format!(
        "process {} survived SIGKILL",
        pid
    )))
}

/// Manages the single service instance of a deployment root
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: Arc<Config>,
    layout: StorageLayout,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, layout: StorageLayout) -> Self {
        Self { config, layout }
    }

    fn app_vars(&self) -> TemplateVars {
        TemplateVars::new().with("AppName", self.config.app.name.as_str())
    }

    /// The PID file, resolved from the app name only
    pub fn pid_file(&self) -> PidFile {
        PidFile::new(File::new(
            self.layout.resolve(&self.config.service.pid_file, &self.app_vars()),
        ))
    }

    /// Resolved `(stdout, stderr)` log paths for a release
    pub fn log_paths(&self, release: &str) -> (PathBuf, PathBuf) {
        let vars = TemplateVars::for_release(&self.config.app.name, release);
        (
            self.layout.resolve(&self.config.service.stdout_log, &vars),
            self.layout.resolve(&self.config.service.stderr_log, &vars),
        )
    }

    /// Record of the running service, stale records are removed
    pub async fn running(&self) -> Result<Option<ProcessRecord>, RevlayError> {
        let pid_file = self.pid_file();
        match pid_file.read().await? {
            Some(record) if is_alive(record.pid) => Ok(Some(record)),
            Some(record) => {
                info!(pid = record.pid, "Removing stale pid file");
                pid_file.remove().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn environment(&self, release: &str, port: u16) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .config
            .deploy
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push(("PORT".to_string(), port.to_string()));
        env.push(("REVLAY_RELEASE".to_string(), release.to_string()));
        env
    }

    /// Spawn the start command for `release` bound to `port`.
    ///
    /// The child leads its own process group and survives the supervisor.
    /// No PID file is written.
    pub async fn spawn(&self, release: &str, port: u16) -> Result<Child, RevlayError> {
        let start = self.config.service.start_command.trim();
        if start.is_empty() {
            return Err(RevlayError::ProcessStart(
                "service.start_command is empty".to_string(),
            ));
        }

        let release_dir = self.layout.release_dir(release);
        if !release_dir.exists().await {
            return Err(RevlayError::ReleaseNotFound(release.to_string()));
        }

        let vars = TemplateVars::for_release(&self.config.app.name, release)
            .with("PORT", port.to_string());
        let command = template::render(start, &vars);

        let (stdout_path, stderr_path) = self.log_paths(release);
        let stdout = open_log(&stdout_path)?;
        let stderr = open_log(&stderr_path)?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(release_dir.path())
            .envs(self.environment(release, port))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|e| {
                RevlayError::ProcessStart(format!("failed to spawn '{}': {}", command, e))
            })?;

        info!(release = %release, port, pid = ?child.id(), "Spawned service: {}", command);
        Ok(child)
    }

    /// Start the service for `release` on `port` and confirm it survives the
    /// startup delay
    pub async fn start_service(
        &self,
        release: &str,
        port: u16,
    ) -> Result<ProcessRecord, RevlayError> {
        if let Some(record) = self.running().await? {
            return Err(RevlayError::AlreadyRunning { pid: record.pid });
        }

        let mut child = self.spawn(release, port).await?;
        let pid = child.id().ok_or_else(|| {
            RevlayError::ProcessStart("process exited before reporting a pid".into())
        })?;

        let record = ProcessRecord::new(pid);
        let pid_file = self.pid_file();
        pid_file.write(&record).await?;

        tokio::time::sleep(self.config.service.startup_delay).await;

        let exited = match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) if !is_alive(pid) => Some("exited".to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        };

        if let Some(status) = exited {
            pid_file.remove().await?;
            let (_, stderr_path) = self.log_paths(release);
            let tail = File::new(&stderr_path).tail(ERROR_TAIL_LINES).await;
            let mut message = format!("release '{}' died during startup ({})", release, status);
            if !tail.is_empty() {
                message.push_str(&format!("\n--- {} ---\n{}", stderr_path.display(), tail));
            }
            return Err(RevlayError::ProcessStart(message));
        }

        info!(release = %release, pid, port, "Service started");
        Ok(record)
    }

    /// Stop the running service, a missing or stale record counts as stopped
    pub async fn stop_service(&self) -> Result<(), RevlayError> {
        let pid_file = self.pid_file();
        let Some(record) = pid_file.read().await? else {
            debug!("No pid file, service not running");
            return Ok(());
        };

        if !is_alive(record.pid) {
            info!(pid = record.pid, "Removing stale pid file");
            return pid_file.remove().await;
        }

        self.run_stop_command().await;

        let forced = terminate(record.pid, self.config.service.graceful_timeout).await?;
        pid_file.remove().await?;

        if forced {
            warn!(pid = record.pid, "Service killed");
        } else {
            info!(pid = record.pid, "Service stopped");
        }
        Ok(())
    }

    async fn run_stop_command(&self) {
        let stop = self.config.service.stop_command.trim();
        if stop.is_empty() {
            return;
        }

        let current = self.layout.current_link();
        let working_dir: &Path = if current.exists() {
            &current
        } else {
            self.layout.root()
        };

        let result = Command::new("sh")
            .arg("-c")
            .arg(stop)
            .current_dir(working_dir)
            .envs(self.config.deploy.environment.iter())
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => debug!("Stop command succeeded"),
            Ok(output) => warn!(
                "Stop command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to run stop command: {}", e),
        }
    }
}

fn open_log(path: &Path) -> Result<std::fs::File, RevlayError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            RevlayError::ProcessStart(format!("failed to open log {}: {}", path.display(), e))
        })
}
