use chrono::{Duration, Utc};
use pipewright_core::ContentHash;
use pipewright_store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, StoreError, StoredArtifact};
use serde_json::json;

fn artifact(source: &str) -> StoredArtifact {
    let hash = ContentHash::of(source);
    StoredArtifact::new(hash.as_str(), "pipeline_test", json!({ "source": source }))
}

#[tokio::test]
async fn fs_store_round_trips_and_shards_by_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let a = artifact("module a {}");

    assert!(store.get(&a.hash).await.unwrap().is_none());
    store.put(a.clone()).await.unwrap();

    let path = store.path_for(&a.hash).unwrap();
    assert!(path.exists());
    assert_eq!(path.parent().unwrap().file_name().unwrap().to_str().unwrap(), &a.hash[..2]);
    assert_eq!(store.get(&a.hash).await.unwrap(), Some(a.clone()));

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].hash, a.hash);
    assert!(listed[0].size_bytes > 0);

    // no temp files left behind
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn fs_store_rejects_bad_hashes_and_flags_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());

    assert!(matches!(store.get("../etc/passwd").await, Err(StoreError::InvalidHash(_))));

    let a = artifact("module b {}");
    let path = store.path_for(&a.hash).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(store.get(&a.hash).await, Err(StoreError::Corrupt { .. })));
    assert!(store.list().await.unwrap().is_empty());

    store.put(a.clone()).await.unwrap();
    assert_eq!(store.get(&a.hash).await.unwrap(), Some(a));
}

#[tokio::test]
async fn fs_store_prunes_only_old_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());

    let mut old = artifact("old");
    old.created_at = Utc::now() - Duration::days(10);
    let fresh = artifact("fresh");
    store.put(old.clone()).await.unwrap();
    store.put(fresh.clone()).await.unwrap();

    assert_eq!(store.prune(Duration::days(1)).await.unwrap(), 1);
    assert!(store.get(&old.hash).await.unwrap().is_none());
    assert!(store.get(&fresh.hash).await.unwrap().is_some());

    assert_eq!(store.clear().await.unwrap(), 1);
    assert!(store.list().await.unwrap().is_empty());
    assert!(!store.remove(&fresh.hash).await.unwrap());
}

#[tokio::test]
async fn clear_leaves_foreign_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let a = artifact("module c {}");
    store.put(a.clone()).await.unwrap();

    let docs = dir.path().join("documents");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("thesis.txt"), b"draft").unwrap();
    let shard = store.path_for(&a.hash).unwrap().parent().unwrap().to_path_buf();
    let in_flight = shard.join(format!(".{}.1234.tmp", a.hash));
    std::fs::write(&in_flight, b"{}").unwrap();
    let notes = shard.join("notes.json");
    std::fs::write(&notes, b"{}").unwrap();

    assert_eq!(store.list().await.unwrap().len(), 1);
    assert_eq!(store.clear().await.unwrap(), 1);
    assert!(store.get(&a.hash).await.unwrap().is_none());
    assert!(docs.join("thesis.txt").exists());
    assert!(in_flight.exists());
    assert!(notes.exists());
}

#[test]
fn path_for_rejects_malformed_hashes() {
    let store = FsArtifactStore::new("/tmp/unused");
    assert!(matches!(store.path_for("a"), Err(StoreError::InvalidHash(_))));
    assert!(matches!(store.path_for(""), Err(StoreError::InvalidHash(_))));
    let hash = ContentHash::of("x");
    let path = store.path_for(hash.as_str()).unwrap();
    assert!(path.ends_with(format!("{}/{}.json", &hash.as_str()[..2], hash.as_str())));
}

#[tokio::test]
async fn missing_root_lists_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path().join("not-yet"));
    assert!(store.list().await.unwrap().is_empty());
    assert_eq!(store.clear().await.unwrap(), 0);
}

#[tokio::test]
async fn memory_store_behaves_like_fs_store() {
    let store = MemoryArtifactStore::new();
    let a = artifact("x");
    store.put(a.clone()).await.unwrap();
    assert_eq!(store.get(&a.hash).await.unwrap(), Some(a.clone()));
    assert_eq!(store.list().await.unwrap().len(), 1);
    assert!(store.remove(&a.hash).await.unwrap());
    assert!(store.is_empty().await);
    assert!(matches!(store.put(StoredArtifact::new("XYZ", "m", json!(null))).await, Err(StoreError::InvalidHash(_))));
}
