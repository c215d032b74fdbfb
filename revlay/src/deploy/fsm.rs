//! Finite State Machine for a single deployment

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::settings::DeployMode;

/// Deployment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    /// Not started
    Pending,

    /// Validating the request and preparing directories
    Preflight,

    /// Copying the release and linking shared paths
    Populating,

    /// Stopping the running service (short downtime only)
    StoppingCurrent,

    /// Switching `current` (short downtime only)
    Activating,

    /// Starting the new service
    Starting,

    /// Probing the new service
    HealthChecking,

    /// Persisting the active port and switching `current` (zero downtime only)
    SwitchingTraffic,

    /// Letting the old service finish (zero downtime only)
    DrainingOld,

    /// Removing old releases
    Pruning,

    /// Deployment finished
    Completed,

    /// Deployment failed
    Failed,

    /// Restoring the previous release
    RollingBack,

    /// Previous release restored
    RolledBack,

    /// Restoring the previous release failed, state unknown
    Critical,
}

const SHORT_DOWNTIME_PLAN: &[DeploymentPhase] = &[
    DeploymentPhase::Pending,
    DeploymentPhase::Preflight,
    DeploymentPhase::Populating,
    DeploymentPhase::StoppingCurrent,
    DeploymentPhase::Activating,
    DeploymentPhase::Starting,
    DeploymentPhase::HealthChecking,
    DeploymentPhase::Pruning,
    DeploymentPhase::Completed,
];

const ZERO_DOWNTIME_PLAN: &[DeploymentPhase] = &[
    DeploymentPhase::Pending,
    DeploymentPhase::Preflight,
    DeploymentPhase::Populating,
    DeploymentPhase::Starting,
    DeploymentPhase::HealthChecking,
    DeploymentPhase::SwitchingTraffic,
    DeploymentPhase::DrainingOld,
    DeploymentPhase::Pruning,
    DeploymentPhase::Completed,
];

impl DeploymentPhase {
    /// True while the deployment is still running forward
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            DeploymentPhase::Completed
                | DeploymentPhase::Failed
                | DeploymentPhase::RollingBack
                | DeploymentPhase::RolledBack
                | DeploymentPhase::Critical
        )
    }

    /// True once nothing else can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentPhase::Completed | DeploymentPhase::RolledBack | DeploymentPhase::Critical
        )
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Move to the next phase of the plan
    Advance,

    /// Current phase failed
    Fail(String),

    /// Start restoring the previous release
    RollBack,

    /// Previous release is serving again
    Restored,

    /// Restoring the previous release failed
    RestoreFailed(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    mode: DeployMode,
    phase: DeploymentPhase,
    error: Option<String>,
    step: u32,
}

impl DeploymentFsm {
    /// Create a new FSM in pending phase
    pub fn new(mode: DeployMode) -> Self {
        Self {
            mode,
            phase: DeploymentPhase::Pending,
            error: None,
            step: 0,
        }
    }

    pub fn mode(&self) -> DeployMode {
        self.mode
    }

    /// Get current phase
    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of transitions taken so far
    pub fn step(&self) -> u32 {
        self.step
    }

    fn plan(&self) -> &'static [DeploymentPhase] {
        match self.mode {
            DeployMode::ShortDowntime => SHORT_DOWNTIME_PLAN,
            DeployMode::ZeroDowntime => ZERO_DOWNTIME_PLAN,
        }
    }

    fn next_phase(&self) -> Option<DeploymentPhase> {
        let plan = self.plan();
        plan.iter()
            .position(|p| *p == self.phase)
            .and_then(|i| plan.get(i + 1))
            .copied()
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_phase = match (self.phase, &event) {
            (phase, DeploymentEvent::Advance) if phase.is_active() => match self.next_phase() {
                Some(next) => next,
                None => return Err(format!("Invalid transition: {:?} -> {:?}", phase, event)),
            },

            (phase, DeploymentEvent::Fail(reason)) if phase.is_active() => {
                self.error = Some(reason.clone());
                DeploymentPhase::Failed
            }

            (DeploymentPhase::Failed, DeploymentEvent::RollBack) => DeploymentPhase::RollingBack,

            (DeploymentPhase::RollingBack, DeploymentEvent::Restored) => {
                DeploymentPhase::RolledBack
            }
            (DeploymentPhase::RollingBack, DeploymentEvent::RestoreFailed(reason)) => {
                self.error = Some(format!(
                    "{}; restore failed: {}",
                    self.error.as_deref().unwrap_or("deployment failed"),
                    reason
                ));
                DeploymentPhase::Critical
            }

            // Invalid transitions
            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = new_phase;
        self.step += 1;
        Ok(())
    }

    /// Advance and announce the phase being entered
    pub fn enter(&mut self, release: &str, expected: DeploymentPhase) -> Result<(), String> {
        self.process(DeploymentEvent::Advance)?;
        if self.phase != expected {
            return Err(format!(
                "Deployment reached {:?}, expected {:?}",
                self.phase, expected
            ));
        }
        info!(release = %release, step = self.step, mode = %self.mode, "{:?}", self.phase);
        Ok(())
    }
}
