//! Deployment hook runner

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::RevlayError;

/// Output lines kept in a hook failure message
const OUTPUT_TAIL_LINES: usize = 10;

/// Hook stage, used for logging and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PreDeploy,
    PostDeploy,
    PreRollback,
    PostRollback,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookStage::PreDeploy => write!(f, "pre_deploy"),
            HookStage::PostDeploy => write!(f, "post_deploy"),
            HookStage::PreRollback => write!(f, "pre_rollback"),
            HookStage::PostRollback => write!(f, "post_rollback"),
        }
    }
}

/// Runs a list of shell commands in order, stopping at the first failure
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hooks(
        &self,
        stage: HookStage,
        commands: &[String],
        working_dir: &Path,
    ) -> Result<(), RevlayError>;
}

/// `sh -c` based hook runner
#[derive(Debug, Clone, Default)]
pub struct ShellHookRunner {
    environment: BTreeMap<String, String>,
}

impl ShellHookRunner {
    pub fn new(environment: BTreeMap<String, String>) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl HookRunner for ShellHookRunner {
    async fn run_hooks(
        &self,
        stage: HookStage,
        commands: &[String],
        working_dir: &Path,
    ) -> Result<(), RevlayError> {
        if commands.is_empty() {
            return Ok(());
        }

        info!("Running {} {} hook(s)", commands.len(), stage);
        for command in commands {
            debug!("{} hook: {}", stage, command);

            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(working_dir)
                .envs(self.environment.iter())
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| {
                    RevlayError::HookFailed(format!("{} hook '{}': {}", stage, command, e))
                })?;

            if !output.status.success() {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let lines: Vec<&str> = combined.lines().collect();
                let tail = lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..].join("\n");

                return Err(RevlayError::HookFailed(format!(
                    "{} hook '{}' exited with {}{}",
                    stage,
                    command,
                    output.status,
                    if tail.is_empty() {
                        String::new()
                    } else {
                        format!(":\n{}", tail)
                    }
                )));
            }
        }
        Ok(())
    }
}
