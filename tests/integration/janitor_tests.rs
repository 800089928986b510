//! Janitor integration tests against a real cache directory.
//!
//! Entry ages are controlled by backdating file modification times.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use derivative_cache::store::{CacheJanitor, DiskCacheStore, JanitorConfig, TMP_DIR_NAME};
use derivative_cache::{derive_key, CacheKey, QualityTier};
use filetime::FileTime;

use super::test_utils::{build_service, create_png, marketplace_asset, stored_keys, MockOriginStore};

const HOUR: Duration = Duration::from_secs(3600);

fn key(n: usize) -> CacheKey {
    derive_key(
        &marketplace_asset(&format!("item-{}.png", n)),
        Some(100),
        None,
        QualityTier::Preview,
    )
}

/// Write an entry of `size` bytes last modified `age` ago.
async fn seed(store: &DiskCacheStore, key: &CacheKey, size: usize, age: Duration) {
    store.write(key, &vec![0xAB; size]).await.unwrap();
    let mtime = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(store.path_for(key), mtime).unwrap();
}

fn janitor_config(max_bytes: u64, max_age: Duration) -> JanitorConfig {
    JanitorConfig {
        max_cache_size_bytes: max_bytes,
        cache_duration: max_age,
        ..JanitorConfig::default()
    }
}

#[tokio::test]
async fn test_size_eviction_removes_oldest_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::open(dir.path()).await.unwrap());

    // key(0) is the oldest, key(5) the newest; 6 x 1000 bytes
    for n in 0..6 {
        seed(&store, &key(n), 1000, HOUR * (10 - n as u32)).await;
    }

    let janitor = CacheJanitor::new(store.clone(), janitor_config(3500, HOUR * 24));
    let report = janitor.sweep(SystemTime::now()).await;

    assert_eq!(report.scanned, 6);
    assert_eq!(report.removed_expired, 0);
    assert_eq!(report.removed_for_size, 3);
    assert_eq!(report.remaining_bytes, 3000);
    assert!(report.remaining_bytes <= 3500);

    let mut expected = vec![key(3), key(4), key(5)];
    expected.sort();
    assert_eq!(stored_keys(dir.path()), expected);
}

#[tokio::test]
async fn test_age_eviction_under_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::open(dir.path()).await.unwrap());

    seed(&store, &key(0), 10, HOUR * 24 * 8).await;
    seed(&store, &key(1), 10, HOUR).await;

    let janitor = CacheJanitor::new(store.clone(), JanitorConfig::default());
    let report = janitor.sweep(SystemTime::now()).await;

    assert_eq!(report.removed_expired, 1);
    assert_eq!(report.removed_for_size, 0);
    assert_eq!(report.remaining_entries, 1);
    assert_eq!(stored_keys(dir.path()), vec![key(1)]);
}

#[tokio::test]
async fn test_sweep_ignores_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::open(dir.path()).await.unwrap());

    std::fs::write(dir.path().join("README"), vec![0u8; 10_000]).unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();
    seed(&store, &key(0), 100, HOUR).await;

    let janitor = CacheJanitor::new(store.clone(), janitor_config(50, HOUR * 24));
    let report = janitor.sweep(SystemTime::now()).await;

    assert_eq!(report.scanned, 1);
    assert_eq!(report.removed_for_size, 1);
    assert!(dir.path().join("README").exists());
    assert!(dir.path().join("subdir").exists());
    assert!(dir.path().join(TMP_DIR_NAME).exists());
}

#[tokio::test]
async fn test_deletion_budget_spreads_work_over_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::open(dir.path()).await.unwrap());
    for n in 0..5 {
        seed(&store, &key(n), 10, HOUR * 48).await;
    }

    let mut config = janitor_config(1_000_000, HOUR * 24);
    config.max_deletions = 2;
    let janitor = CacheJanitor::new(store.clone(), config);

    let report = janitor.sweep(SystemTime::now()).await;
    assert_eq!(report.removed_count(), 2);
    assert!(report.truncated);
    assert_eq!(stored_keys(dir.path()).len(), 3);

    janitor.sweep(SystemTime::now()).await;
    let report = janitor.sweep(SystemTime::now()).await;
    assert_eq!(report.removed_count(), 1);
    assert!(!report.truncated);
    assert!(stored_keys(dir.path()).is_empty());
}

#[tokio::test]
async fn test_sweep_of_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::new(dir.path().join("never-created")));

    let janitor = CacheJanitor::new(store, JanitorConfig::default());
    let report = janitor.sweep(SystemTime::now()).await;
    assert_eq!(report.scanned, 0);
    assert_eq!(report.remaining_bytes, 0);
}

#[tokio::test]
async fn test_evicted_derivative_is_regenerated() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(32, 32),
    ));
    let service = build_service(origin.clone(), dir.path());
    let asset = marketplace_asset("a.png");

    let first = service.serve(&asset, None, None, None).await.unwrap();
    let old = FileTime::from_system_time(SystemTime::now() - HOUR * 24 * 30);
    filetime::set_file_mtime(service.store().path_for(&first.key), old).unwrap();

    let janitor = CacheJanitor::new(service.store().clone(), JanitorConfig::default());
    assert_eq!(janitor.sweep(SystemTime::now()).await.removed_expired, 1);

    let second = service.serve(&asset, None, None, None).await.unwrap();
    assert!(!second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(origin.get_count(), 2);
}

#[tokio::test]
async fn test_background_janitor_sweeps_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskCacheStore::open(dir.path()).await.unwrap());
    seed(&store, &key(0), 10, HOUR * 24 * 8).await;

    let janitor = Arc::new(CacheJanitor::new(store.clone(), JanitorConfig::default()));
    let handle = janitor.spawn();

    for _ in 0..50 {
        if stored_keys(dir.path()).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert!(stored_keys(dir.path()).is_empty());
}

#[tokio::test]
async fn test_open_removes_orphaned_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let tmp = dir.path().join(TMP_DIR_NAME);
    std::fs::create_dir_all(&tmp).unwrap();

    let stale = tmp.join("deadbeef.1.0");
    let fresh = tmp.join("deadbeef.1.1");
    std::fs::write(&stale, b"partial").unwrap();
    std::fs::write(&fresh, b"partial").unwrap();
    let old = FileTime::from_system_time(SystemTime::now() - HOUR);
    filetime::set_file_mtime(&stale, old).unwrap();

    let _store = DiskCacheStore::open(dir.path()).await.unwrap();

    assert!(!stale.exists());
    // A write may still be in progress in another process
    assert!(fresh.exists());
}
