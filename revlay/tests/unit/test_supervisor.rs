//! Process supervisor tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use revlay::errors::{ErrorKind, RevlayError};
use revlay::filesys::file::File;
use revlay::storage::layout::StorageLayout;
use revlay::storage::releases::ReleaseStore;
use revlay::storage::settings::{Config, DeployMode};
use revlay::supervisor::process::{is_alive, Supervisor};

use crate::helpers::{free_port, test_config};

async fn supervisor_for(root: &std::path::Path, config: Config) -> Supervisor {
    let layout = StorageLayout::new(root);
    ReleaseStore::new(layout.clone())
        .populate("r1", None)
        .await
        .unwrap();
    Supervisor::new(Arc::new(config), layout)
}

#[tokio::test]
async fn test_start_writes_record_and_refuses_second_start() {
    let dir = TempDir::new().unwrap();
    let config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    let supervisor = supervisor_for(dir.path(), config).await;

    let record = supervisor.start_service("r1", 9000).await.unwrap();
    assert!(is_alive(record.pid));

    let contents = std::fs::read_to_string(dir.path().join("pids/shop.pid")).unwrap();
    assert_eq!(contents, format!("{}:{}", record.pid, record.started_at));

    let err = supervisor.start_service("r1", 9000).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
    assert!(matches!(err, RevlayError::AlreadyRunning { pid } if pid == record.pid));

    supervisor.stop_service().await.unwrap();
    assert!(!is_alive(record.pid));
    assert!(!dir.path().join("pids/shop.pid").exists());
}

#[tokio::test]
async fn test_port_is_passed_to_command_and_environment() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    config.service.start_command =
        "echo \"arg=${PORT} env=$PORT\" > port.txt; exec sleep 300".to_string();
    let supervisor = supervisor_for(dir.path(), config).await;

    supervisor.start_service("r1", 9123).await.unwrap();
    let written = std::fs::read_to_string(dir.path().join("releases/r1/port.txt")).unwrap();
    assert_eq!(written.trim(), "arg=9123 env=9123");

    supervisor.stop_service().await.unwrap();
}

#[tokio::test]
async fn test_early_exit_reports_error_log_tail() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    config.service.start_command = "echo 'listen: address in use' >&2; exit 1".to_string();
    let supervisor = supervisor_for(dir.path(), config).await;

    let err = supervisor.start_service("r1", 9000).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessStartFailure);
    assert!(err.to_string().contains("address in use"));
    assert!(!dir.path().join("pids/shop.pid").exists());
}

#[tokio::test]
async fn test_stop_without_pid_file_is_ok() {
    let dir = TempDir::new().unwrap();
    let config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    let supervisor = supervisor_for(dir.path(), config).await;

    supervisor.stop_service().await.unwrap();
}

#[tokio::test]
async fn test_stale_pid_file_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    let supervisor = supervisor_for(dir.path(), config).await;

    // A finished child leaves a pid nobody owns any more
    let mut child = tokio::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id().unwrap();
    child.wait().await.unwrap();

    let pid_file = File::new(dir.path().join("pids/shop.pid"));
    pid_file.write_string(&format!("{}:0", dead_pid)).await.unwrap();

    assert!(supervisor.running().await.unwrap().is_none());
    assert!(!pid_file.exists().await);

    pid_file.write_string(&dead_pid.to_string()).await.unwrap();
    supervisor.stop_service().await.unwrap();
    assert!(!pid_file.exists().await);
}

#[tokio::test]
async fn test_stop_escalates_to_sigkill() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    config.service.start_command = "trap '' TERM; sleep 300".to_string();
    config.service.graceful_timeout = Duration::from_millis(600);
    let supervisor = supervisor_for(dir.path(), config).await;

    let record = supervisor.start_service("r1", 9000).await.unwrap();

    let started = Instant::now();
    supervisor.stop_service().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert!(!is_alive(record.pid));
    assert!(!dir.path().join("pids/shop.pid").exists());
}

#[tokio::test]
async fn test_stop_command_runs_first() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    config.service.stop_command = "touch stopped.flag".to_string();
    let supervisor = supervisor_for(dir.path(), config).await;

    supervisor.start_service("r1", 9000).await.unwrap();
    supervisor.stop_service().await.unwrap();

    assert!(dir.path().join("stopped.flag").exists());
}

#[tokio::test]
async fn test_empty_start_command_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(DeployMode::ShortDowntime, free_port(), free_port());
    config.service.start_command = String::new();
    let supervisor = supervisor_for(dir.path(), config).await;

    let err = supervisor.start_service("r1", 9000).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessStartFailure);
}
