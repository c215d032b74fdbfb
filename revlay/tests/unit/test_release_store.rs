//! Release store tests

use std::path::PathBuf;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use revlay::errors::ErrorKind;
use revlay::storage::layout::StorageLayout;
use revlay::storage::releases::ReleaseStore;

use crate::helpers::{current_target, source_dir};

async fn store_with_releases(root: &std::path::Path, names: &[&str]) -> ReleaseStore {
    let store = ReleaseStore::new(StorageLayout::new(root));
    for name in names {
        store.populate(name, None).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_list_on_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = ReleaseStore::new(StorageLayout::new(dir.path().join("nothing-here")));

    assert!(store.list().await.unwrap().is_empty());
    assert_eq!(store.current().await.unwrap(), None);
}

#[tokio::test]
async fn test_list_is_sorted_and_ignores_files() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["20250103-000000", "20250101-000000"]).await;
    std::fs::write(dir.path().join("releases/notes.txt"), "x").unwrap();

    assert_eq!(
        store.list().await.unwrap(),
        vec!["20250101-000000".to_string(), "20250103-000000".to_string()]
    );
}

#[tokio::test]
async fn test_populate_copies_source_and_rejects_existing() {
    let dir = TempDir::new().unwrap();
    let source = source_dir(dir.path(), "build");
    let store = ReleaseStore::new(StorageLayout::new(dir.path().join("root")));

    let path = store.populate("r1", Some(&source)).await.unwrap();
    assert_eq!(std::fs::read_to_string(path.join("app.txt")).unwrap(), "build");

    assert_err!(store.populate("r1", Some(&source)).await);
}

#[tokio::test]
async fn test_switch_current_is_relative_and_replaces() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2"]).await;

    assert_ok!(store.switch_current("r1").await);
    assert_eq!(
        std::fs::read_link(dir.path().join("current")).unwrap(),
        PathBuf::from("releases/r1")
    );

    store.switch_current("r2").await.unwrap();
    assert_eq!(store.current().await.unwrap(), Some("r2".to_string()));
    assert!(dir.path().join("current").is_dir());
    assert!(!dir.path().join("current.tmp").exists());
}

#[tokio::test]
async fn test_switch_to_missing_release_keeps_current() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1"]).await;
    store.switch_current("r1").await.unwrap();

    assert_err!(store.switch_current("ghost").await);
    assert_eq!(current_target(dir.path()), Some("r1".to_string()));
}

#[tokio::test]
async fn test_shared_paths_replace_copied_entries() {
    let dir = TempDir::new().unwrap();
    let source = source_dir(dir.path(), "build");
    std::fs::create_dir_all(source.join("storage")).unwrap();
    std::fs::write(source.join("storage/from-build.txt"), "stale").unwrap();

    let root = dir.path().join("root");
    let store = ReleaseStore::new(StorageLayout::new(&root));
    let path = store.populate("r1", Some(&source)).await.unwrap();
    store
        .link_shared("r1", &["storage".to_string(), "config/app.env".to_string()])
        .await
        .unwrap();

    let link = std::fs::symlink_metadata(path.join("storage")).unwrap();
    assert!(link.file_type().is_symlink());
    assert_eq!(std::fs::read_link(path.join("storage")).unwrap(), root.join("shared/storage"));
    assert!(!root.join("shared/storage/from-build.txt").exists());
    assert!(std::fs::symlink_metadata(path.join("config/app.env"))
        .unwrap()
        .file_type()
        .is_symlink());

    assert_err!(store.link_shared("r1", &["../escape".to_string()]).await);
}

#[tokio::test]
async fn test_prune_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2", "r3", "r4", "r5"]).await;
    store.switch_current("r5").await.unwrap();

    let removed = store.prune(2, "shop", &[]).await.unwrap();
    assert_eq!(removed, vec!["r1", "r2", "r3"]);
    assert_eq!(store.list().await.unwrap(), vec!["r4", "r5"]);
}

#[tokio::test]
async fn test_prune_never_removes_current() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2", "r3", "r4", "r5"]).await;
    store.switch_current("r1").await.unwrap();

    store.prune(2, "shop", &[]).await.unwrap();
    assert_eq!(store.list().await.unwrap(), vec!["r1", "r4", "r5"]);
    assert_eq!(store.current().await.unwrap(), Some("r1".to_string()));
}

#[tokio::test]
async fn test_prune_unlimited_and_small_sets() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2", "r3"]).await;

    assert!(store.prune(-1, "shop", &[]).await.unwrap().is_empty());
    assert!(store.prune(5, "shop", &[]).await.unwrap().is_empty());
    assert_eq!(store.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_prune_removes_only_per_release_logs() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2"]).await;
    store.switch_current("r2").await.unwrap();

    let logs = dir.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("shop-r1.log"), "old").unwrap();
    std::fs::write(logs.join("shop-r2.log"), "new").unwrap();
    std::fs::write(logs.join("shop-err.log"), "shared").unwrap();

    store
        .prune(
            1,
            "shop",
            &["logs/{{.AppName}}-{{.ReleaseName}}.log", "logs/{{.AppName}}-err.log"],
        )
        .await
        .unwrap();

    assert!(!logs.join("shop-r1.log").exists());
    assert!(logs.join("shop-r2.log").exists());
    assert!(logs.join("shop-err.log").exists());
}

#[tokio::test]
async fn test_failed_copy_leaves_no_release() {
    let dir = TempDir::new().unwrap();
    let store = ReleaseStore::new(StorageLayout::new(dir.path().join("root")));

    assert_err!(store.populate("r1", Some(&dir.path().join("missing"))).await);
    assert!(!store.exists("r1").await);
    assert_ok!(store.populate("r1", None).await);
}

#[tokio::test]
async fn test_prune_stops_when_current_is_unreadable() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2", "r3"]).await;
    // A regular file where the symlink belongs
    std::fs::write(dir.path().join("current"), "r1").unwrap();

    let err = store.prune(1, "shop", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PruneWarning);
    assert_eq!(store.list().await.unwrap(), vec!["r1", "r2", "r3"]);
}

#[tokio::test]
async fn test_prune_keeps_dated_logs() {
    let dir = TempDir::new().unwrap();
    let store = store_with_releases(dir.path(), &["r1", "r2"]).await;
    store.switch_current("r2").await.unwrap();

    let logs = dir.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    let dated = format!("shop-r1-{}.log", chrono::Local::now().format("%Y-%m-%d"));
    std::fs::write(logs.join(&dated), "old").unwrap();

    let removed = store
        .prune(1, "shop", &["logs/{{.AppName}}-{{.ReleaseName}}-{{.Date}}.log"])
        .await
        .unwrap();

    assert_eq!(removed, vec!["r1"]);
    assert!(logs.join(&dated).exists());
}
