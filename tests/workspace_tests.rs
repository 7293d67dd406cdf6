use kiln::workspace::WorkspaceManager;
use uuid::Uuid;

#[tokio::test]
async fn test_allocate_creates_per_job_directory() {
    let root = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(root.path().join("jobs"));
    manager.ensure_root().await.unwrap();

    let job_id = Uuid::new_v4();
    let path = manager.allocate(job_id).await.unwrap();
    assert!(path.is_dir());
    assert!(path.ends_with(job_id.to_string()));

    // Idempotent: allocating again is not an error.
    let again = manager.allocate(job_id).await.unwrap();
    assert_eq!(path, again);
}

#[tokio::test]
async fn test_remove_deletes_recursively() {
    let root = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(root.path().join("jobs"));
    manager.ensure_root().await.unwrap();

    let job_id = Uuid::new_v4();
    let path = manager.allocate(job_id).await.unwrap();
    tokio::fs::create_dir_all(path.join("node_modules/dep")).await.unwrap();
    tokio::fs::write(path.join("index.js"), "console.log('hi')").await.unwrap();

    manager.remove(job_id).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_remove_missing_workspace_is_silent() {
    let root = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(root.path().join("jobs"));
    manager.ensure_root().await.unwrap();

    // Never allocated; removal must not panic or error.
    manager.remove(Uuid::new_v4()).await;
}

#[tokio::test]
async fn test_no_workspaces_remain_after_cleanup() {
    let root = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(root.path().join("jobs"));
    manager.ensure_root().await.unwrap();

    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        manager.allocate(*id).await.unwrap();
    }
    for id in &ids {
        manager.remove(*id).await;
    }

    let mut entries = tokio::fs::read_dir(manager.root()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}
