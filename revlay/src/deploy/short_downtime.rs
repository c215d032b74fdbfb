//! Stop, switch, start: the service is down between stop and start

use std::path::Path;

use tracing::{error, info, warn};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentPhase};
use crate::deploy::orchestrator::{advance, fail, LocalDeployer};
use crate::errors::RevlayError;
use crate::storage::settings::DeployMode;

pub async fn deploy(
    deployer: &LocalDeployer,
    release: &str,
    source: Option<&Path>,
) -> Result<(), RevlayError> {
    let mut fsm = DeploymentFsm::new(DeployMode::ShortDowntime);
    let port = deployer.config.service.port;

    advance(&mut fsm, release, DeploymentPhase::Preflight)?;
    let previous = deployer.releases.current().await?;

    advance(&mut fsm, release, DeploymentPhase::Populating)?;
    if let Err(e) = deployer.prepare_release(release, source).await {
        return Err(fail(&mut fsm, e));
    }

    advance(&mut fsm, release, DeploymentPhase::StoppingCurrent)?;
    if let Err(e) = deployer.supervisor.stop_service().await {
        warn!("Failed to stop current service, continuing: {}", e);
    }

    advance(&mut fsm, release, DeploymentPhase::Activating)?;
    if let Err(e) = deployer.releases.switch_current(release).await {
        let e = fail(&mut fsm, e);
        if let Some(previous) = &previous {
            // `current` still points at the previous release
            if let Err(restart) = deployer.supervisor.start_service(previous, port).await {
                error!(release = %previous, "Failed to restart previous release: {}", restart);
            }
        }
        return Err(e);
    }

    advance(&mut fsm, release, DeploymentPhase::Starting)?;
    let started = match deployer.supervisor.start_service(release, port).await {
        Ok(_) => {
            advance(&mut fsm, release, DeploymentPhase::HealthChecking)?;
            deployer.health_probe()?.wait_healthy(port).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = started {
        let e = fail(&mut fsm, e);
        if let Err(stop) = deployer.supervisor.stop_service().await {
            warn!(release = %release, "Failed to stop failed release: {}", stop);
        }

        return match previous {
            Some(previous) if previous != release => {
                Err(restore_previous(deployer, &mut fsm, release, &previous, e).await)
            }
            _ => Err(e),
        };
    }

    deployer.finish(&mut fsm, release).await
}

/// Switch back to `previous` and start it again
async fn restore_previous(
    deployer: &LocalDeployer,
    fsm: &mut DeploymentFsm,
    failed: &str,
    previous: &str,
    cause: RevlayError,
) -> RevlayError {
    let port = deployer.config.service.port;
    let reason = cause.to_string();
    warn!(release = %failed, previous = %previous, "Deployment failed, rolling back: {}", reason);
    if let Err(e) = fsm.process(DeploymentEvent::RollBack) {
        warn!("{}", e);
    }

    let restored = async {
        deployer.releases.switch_current(previous).await?;
        match deployer.supervisor.start_service(previous, port).await {
            Ok(_) => {}
            Err(RevlayError::AlreadyRunning { pid }) => {
                info!(pid, "Previous release already running");
            }
            Err(e) => return Err(e),
        }
        deployer.health_probe()?.wait_healthy(port).await
    }
    .await;

    match restored {
        Ok(()) => {
            let _ = fsm.process(DeploymentEvent::Restored);
            warn!(release = %failed, restored = %previous, "Rolled back");
            RevlayError::RolledBack {
                failed: failed.to_string(),
                restored: previous.to_string(),
                reason,
            }
        }
        Err(e) => {
            let _ = fsm.process(DeploymentEvent::RestoreFailed(e.to_string()));
            error!(release = %failed, previous = %previous, "Rollback failed: {}", e);
            RevlayError::CriticalRecovery {
                failed: failed.to_string(),
                previous: previous.to_string(),
                reason: format!("{}; rollback: {}", reason, e),
            }
        }
    }
}
