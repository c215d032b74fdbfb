//! Blue-green cutover between the primary and alternate port

use std::path::Path;

use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::deploy::fsm::{DeploymentFsm, DeploymentPhase};
use crate::deploy::orchestrator::{advance, fail, LocalDeployer};
use crate::errors::RevlayError;
use crate::filesys::file::File;
use crate::storage::settings::DeployMode;
use crate::supervisor::pidfile::ProcessRecord;
use crate::supervisor::process::{is_alive, send_signal, terminate};

/// Error log lines included when the new process dies early
const ERROR_TAIL_LINES: usize = 20;

pub async fn deploy(
    deployer: &LocalDeployer,
    release: &str,
    source: Option<&Path>,
) -> Result<(), RevlayError> {
    let mut fsm = DeploymentFsm::new(DeployMode::ZeroDowntime);
    let service = &deployer.config.service;

    advance(&mut fsm, release, DeploymentPhase::Preflight)?;
    let probe = deployer.health_probe()?;

    advance(&mut fsm, release, DeploymentPhase::Populating)?;
    if let Err(e) = deployer.prepare_release(release, source).await {
        return Err(fail(&mut fsm, e));
    }

    let (old_port, new_port) = deployer
        .port_state
        .cutover_ports(service.port, service.alt_port)
        .await?;
    let old_record = deployer.supervisor.running().await?;
    info!(release = %release, old_port, new_port, "Ports selected");

    advance(&mut fsm, release, DeploymentPhase::Starting)?;
    let mut child = match deployer.supervisor.spawn(release, new_port).await {
        Ok(child) => child,
        Err(e) => return Err(fail(&mut fsm, e)),
    };
    let Some(new_pid) = child.id() else {
        return Err(fail(
            &mut fsm,
            RevlayError::ProcessStart("new release process exited during startup".into()),
        ));
    };

    advance(&mut fsm, release, DeploymentPhase::HealthChecking)?;
    let healthy = async {
        if probe.is_disabled() {
            tokio::time::sleep(service.startup_delay).await;
        }
        probe.wait_healthy(new_port).await
    };

    tokio::select! {
        status = child.wait() => {
            let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
            let (_, stderr_path) = deployer.supervisor.log_paths(release);
            let tail = File::new(&stderr_path).tail(ERROR_TAIL_LINES).await;
            let mut message = format!("new release process exited during startup ({})", status);
            if !tail.is_empty() {
                message.push_str(&format!("\n--- {} ---\n{}", stderr_path.display(), tail));
            }
            return Err(fail(&mut fsm, RevlayError::ProcessStart(message)));
        }
        health = healthy => {
            if let Err(e) = health {
                warn!(release = %release, pid = new_pid, "New release unhealthy, terminating it");
                if let Err(signal_err) = send_signal(new_pid, Signal::SIGTERM) {
                    warn!(pid = new_pid, "Failed to signal new release: {}", signal_err);
                }
                return Err(fail(&mut fsm, e));
            }
        }
    }

    advance(&mut fsm, release, DeploymentPhase::SwitchingTraffic)?;
    let switched = async {
        deployer.port_state.write(new_port).await?;
        deployer.releases.switch_current(release).await
    }
    .await;
    if let Err(e) = switched {
        warn!(release = %release, "Traffic switch failed, stopping new release");
        if let Err(state_err) = deployer.port_state.write(old_port).await {
            warn!("Failed to restore active port: {}", state_err);
        }
        if let Err(stop) = terminate(new_pid, service.graceful_timeout).await {
            warn!(pid = new_pid, "Failed to stop new release: {}", stop);
        }
        return Err(fail(&mut fsm, e));
    }
    deployer
        .supervisor
        .pid_file()
        .write(&ProcessRecord::new(new_pid))
        .await?;
    info!(release = %release, port = new_port, pid = new_pid, "Traffic switched");

    advance(&mut fsm, release, DeploymentPhase::DrainingOld)?;
    match old_record {
        Some(old) if old.pid != new_pid => {
            tokio::time::sleep(service.graceful_timeout).await;
            if is_alive(old.pid) {
                info!(pid = old.pid, port = old_port, "Stopping old release");
                if let Err(e) = send_signal(old.pid, Signal::SIGTERM) {
                    warn!(pid = old.pid, "Failed to stop old release: {}", e);
                }
            }
        }
        _ => info!("No previous service to stop"),
    }

    deployer.finish(&mut fsm, release).await
}
