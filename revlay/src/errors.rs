//! Error types for revlay

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for revlay
#[derive(Error, Debug)]
pub enum RevlayError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Another deployment is already in progress (lock held on {})", .0.display())]
    LockContention(PathBuf),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Release '{0}' does not exist")]
    ReleaseNotFound(String),

    #[error("Failed to start service: {0}")]
    ProcessStart(String),

    #[error("Service is already running with PID {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("Health check failed: {0}")]
    HealthCheckTimeout(String),

    #[error("Deployment of '{failed}' failed ({reason}), rolled back to '{restored}'")]
    RolledBack {
        failed: String,
        restored: String,
        reason: String,
    },

    #[error(
        "CRITICAL: deployment of '{failed}' failed and restoring '{previous}' also failed, \
         service state is unknown: {reason}"
    )]
    CriticalRecovery {
        failed: String,
        previous: String,
        reason: String,
    },

    #[error("Prune error: {0}")]
    PruneFailed(String),

    #[error("Hook failed: {0}")]
    HookFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Operational classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LockContention,
    Validation,
    ProcessStartFailure,
    AlreadyRunning,
    HealthCheckTimeout,
    RolledBack,
    CriticalRecoveryFailure,
    PruneWarning,
    Other,
}

impl RevlayError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RevlayError::LockContention(_) => ErrorKind::LockContention,
            RevlayError::ValidationError(_) | RevlayError::ReleaseNotFound(_) => {
                ErrorKind::Validation
            }
            RevlayError::ProcessStart(_) => ErrorKind::ProcessStartFailure,
            RevlayError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            RevlayError::HealthCheckTimeout(_) => ErrorKind::HealthCheckTimeout,
            RevlayError::RolledBack { .. } => ErrorKind::RolledBack,
            RevlayError::CriticalRecovery { .. } => ErrorKind::CriticalRecoveryFailure,
            RevlayError::PruneFailed(_) => ErrorKind::PruneWarning,
            _ => ErrorKind::Other,
        }
    }

    /// True when the running state is unknown and a human has to step in
    pub fn is_critical(&self) -> bool {
        self.kind() == ErrorKind::CriticalRecoveryFailure
    }
}

impl From<anyhow::Error> for RevlayError {
    fn from(err: anyhow::Error) -> Self {
        RevlayError::Internal(err.to_string())
    }
}
