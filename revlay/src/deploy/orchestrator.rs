//! Deployment orchestrator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::deploy::fsm::{DeploymentFsm, DeploymentPhase};
use crate::deploy::hooks::{HookRunner, HookStage, ShellHookRunner};
use crate::deploy::{short_downtime, zero_downtime};
use crate::errors::RevlayError;
use crate::storage::layout::StorageLayout;
use crate::storage::lock::DeployLock;
use crate::storage::releases::{validate_release_name, ReleaseInfo, ReleaseStore};
use crate::storage::settings::{Config, DeployMode};
use crate::storage::state::ActivePortState;
use crate::supervisor::health::HealthProbe;
use crate::supervisor::pidfile::ProcessRecord;
use crate::supervisor::process::Supervisor;

/// Operations exposed to the CLI and other callers
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Create, activate and start a new release from `source`
    async fn deploy(&self, release: &str, source: Option<&Path>) -> Result<(), RevlayError>;

    /// Re-activate an existing release
    async fn rollback(&self, release: &str) -> Result<(), RevlayError>;

    /// Release names, oldest first
    async fn list_releases(&self) -> Result<Vec<String>, RevlayError>;

    /// Release `current` points at, `None` before the first deploy
    async fn current_release(&self) -> Result<Option<String>, RevlayError>;

    /// Remove old releases, returns the removed names
    async fn prune(&self) -> Result<Vec<String>, RevlayError>;
}

/// Deployer acting on a local deployment root
pub struct LocalDeployer {
    pub(crate) config: Arc<Config>,
    pub(crate) layout: StorageLayout,
    pub(crate) releases: ReleaseStore,
    pub(crate) supervisor: Supervisor,
    pub(crate) port_state: ActivePortState,
    pub(crate) hooks: Arc<dyn HookRunner>,
}

impl LocalDeployer {
    /// Build a deployer for `root`, an unset mode becomes zero downtime
    pub fn new(mut config: Config, root: impl Into<PathBuf>) -> Self {
        if config.deploy.mode.is_none() {
            config.deploy.mode = Some(DeployMode::ZeroDowntime);
        }

        let config = Arc::new(config);
        let layout = StorageLayout::new(root);
        let hooks: Arc<dyn HookRunner> =
            Arc::new(ShellHookRunner::new(config.deploy.environment.clone()));

        Self {
            releases: ReleaseStore::new(layout.clone()),
            supervisor: Supervisor::new(Arc::clone(&config), layout.clone()),
            port_state: ActivePortState::new(layout.active_port_file()),
            hooks,
            layout,
            config,
        }
    }

    /// Replace the hook runner
    pub fn with_hook_runner(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn port_state(&self) -> &ActivePortState {
        &self.port_state
    }

    pub fn mode(&self) -> DeployMode {
        self.config.mode()
    }

    pub async fn list_release_info(&self) -> Result<Vec<ReleaseInfo>, RevlayError> {
        self.releases.list_info().await
    }

    /// Port the live service listens on for the configured mode
    pub async fn live_port(&self) -> Result<u16, RevlayError> {
        let primary = self.config.service.port;
        if self.mode() != DeployMode::ZeroDowntime {
            return Ok(primary);
        }
        Ok(match self.port_state.read().await? {
            Some(port) if port == self.config.service.alt_port => port,
            _ => primary,
        })
    }

    /// Start the current release on the live port
    pub async fn start_service(&self) -> Result<ProcessRecord, RevlayError> {
        let Some(current) = self.releases.current().await? else {
            return Err(RevlayError::ValidationError(
                "no current release to start".to_string(),
            ));
        };
        let port = self.live_port().await?;
        self.supervisor.start_service(&current, port).await
    }

    pub async fn stop_service(&self) -> Result<(), RevlayError> {
        self.supervisor.stop_service().await
    }

    pub(crate) fn health_probe(&self) -> Result<HealthProbe, RevlayError> {
        HealthProbe::from_config(&self.config.service)
    }

    /// Validate, create the layout and take the deploy lock
    fn begin(&self, release: &str) -> Result<DeployLock, RevlayError> {
        validate_release_name(release)?;
        std::fs::create_dir_all(self.layout.root()).map_err(|e| {
            RevlayError::StorageError(format!(
                "failed to create {}: {}",
                self.layout.root().display(),
                e
            ))
        })?;
        DeployLock::try_acquire(&self.layout.lock_file())
    }

    /// Populate the release, link shared paths and run pre-deploy hooks.
    ///
    /// A half-created release is removed on failure.
    pub(crate) async fn prepare_release(
        &self,
        release: &str,
        source: Option<&Path>,
    ) -> Result<PathBuf, RevlayError> {
        self.layout.setup().await?;
        let path = self.releases.populate(release, source).await?;

        let result = async {
            self.releases
                .link_shared(release, &self.config.deploy.shared_paths)
                .await?;
            self.hooks
                .run_hooks(HookStage::PreDeploy, &self.config.hooks.pre_deploy, &path)
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(release = %release, "Removing half-created release");
            if let Err(cleanup) = self.releases.remove(release).await {
                error!(release = %release, "Failed to remove release: {}", cleanup);
            }
            return Err(e);
        }
        Ok(path)
    }

    /// Prune and run post-deploy hooks, neither can fail the deployment
    pub(crate) async fn finish(
        &self,
        fsm: &mut DeploymentFsm,
        release: &str,
    ) -> Result<(), RevlayError> {
        advance(fsm, release, DeploymentPhase::Pruning)?;
        if let Err(e) = self.prune().await {
            warn!(release = %release, "Prune failed: {}", e);
        }

        let path = self.releases.release_path(release);
        if let Err(e) = self
            .hooks
            .run_hooks(HookStage::PostDeploy, &self.config.hooks.post_deploy, &path)
            .await
        {
            warn!(release = %release, "Post-deploy hook failed: {}", e);
        }

        advance(fsm, release, DeploymentPhase::Completed)?;
        info!(release = %release, "Deployment completed");
        Ok(())
    }
}

/// Advance the FSM to `phase`
pub(crate) fn advance(
    fsm: &mut DeploymentFsm,
    release: &str,
    phase: DeploymentPhase,
) -> Result<(), RevlayError> {
    fsm.enter(release, phase).map_err(RevlayError::Internal)
}

/// Record a failure in the FSM and hand the error back
pub(crate) fn fail(fsm: &mut DeploymentFsm, error: RevlayError) -> RevlayError {
    if let Err(e) = fsm.process(crate::deploy::fsm::DeploymentEvent::Fail(error.to_string())) {
        warn!("{}", e);
    }
    error
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn deploy(&self, release: &str, source: Option<&Path>) -> Result<(), RevlayError> {
        let _lock = self.begin(release)?;
        info!(release = %release, mode = %self.mode(), "Starting deployment");

        match self.mode() {
            DeployMode::ShortDowntime => short_downtime::deploy(self, release, source).await,
            DeployMode::ZeroDowntime => zero_downtime::deploy(self, release, source).await,
        }
    }

    async fn rollback(&self, release: &str) -> Result<(), RevlayError> {
        validate_release_name(release)?;
        if !self.releases.exists(release).await {
            return Err(RevlayError::ReleaseNotFound(release.to_string()));
        }
        let _lock = self.begin(release)?;

        let path = self.releases.release_path(release);
        info!(release = %release, "Rolling back");

        self.hooks
            .run_hooks(HookStage::PreRollback, &self.config.hooks.pre_rollback, &path)
            .await?;

        if let Err(e) = self.supervisor.stop_service().await {
            warn!("Failed to stop running service: {}", e);
        }

        self.releases.switch_current(release).await?;

        let port = self.live_port().await?;
        match self.supervisor.start_service(release, port).await {
            Ok(_) => {}
            Err(RevlayError::AlreadyRunning { pid }) => {
                info!(pid, "Service already running");
            }
            Err(e) => return Err(e),
        }
        self.health_probe()?.wait_healthy(port).await?;

        if let Err(e) = self
            .hooks
            .run_hooks(HookStage::PostRollback, &self.config.hooks.post_rollback, &path)
            .await
        {
            warn!(release = %release, "Post-rollback hook failed: {}", e);
        }

        info!(release = %release, "Rollback completed");
        Ok(())
    }

    async fn list_releases(&self) -> Result<Vec<String>, RevlayError> {
        self.releases.list().await
    }

    async fn current_release(&self) -> Result<Option<String>, RevlayError> {
        self.releases.current().await
    }

    async fn prune(&self) -> Result<Vec<String>, RevlayError> {
        let service = &self.config.service;
        self.releases
            .prune(
                self.config.app.keep_releases,
                &self.config.app.name,
                &[service.stdout_log.as_str(), service.stderr_log.as_str()],
            )
            .await
    }
}
