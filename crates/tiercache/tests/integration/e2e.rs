use std::time::Duration;

use tiercache::caching::{Tier, Ttl};

use crate::utils::{open_cache, record_path, setup_cache, sleep_ms};

const MEMORY_AND_FS: &str = r#"
tiers:
  - type: memory
    ttl: 1h
  - type: filesystem
    path: $CACHE_DIR/shared
    ttl: 10s
    shared: false
"#;

#[tokio::test]
async fn test_backfill_after_restart() {
    let (cache, cache_dir) = setup_cache(MEMORY_AND_FS);
    assert!(!cache.rejection_safe());
    assert!(!cache.is_shared());

    cache.set("foo", "bar".into(), None).await.unwrap();
    assert_eq!(cache.tracked_keys(), ["foo"]);
    drop(cache);

    // only the file system tier survives
    let cache = open_cache(MEMORY_AND_FS, cache_dir.path());
    assert_eq!(cache.tiers()[0].get("foo").await.unwrap(), None);

    assert_eq!(cache.get("foo").await.unwrap().as_deref(), Some("bar"));
    assert_eq!(
        cache.tiers()[0].get("foo").await.unwrap().as_deref(),
        Some("bar")
    );
}

#[tokio::test]
async fn test_expiration_deletes_records() {
    let (cache, cache_dir) = setup_cache(MEMORY_AND_FS);
    let path = record_path(&cache_dir.path().join("shared"), "foo");

    cache
        .set("foo", "bar".into(), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(path.is_file());
    assert!(cache.effective_ttl("foo").unwrap() <= Ttl::Finite(Duration::from_millis(100)));

    sleep_ms(300).await;
    assert!(!path.exists());
    assert!(cache.tracked_keys().is_empty());
    assert_eq!(cache.get("foo").await.unwrap(), None);
}

#[tokio::test]
async fn test_private_tier_is_evicted_on_read() {
    let (cache, cache_dir) = setup_cache(MEMORY_AND_FS);
    let path = record_path(&cache_dir.path().join("shared"), "foo");

    // the memory tier keeps its copy for an hour, the file system tier for 10 seconds
    cache.set("foo", "bar".into(), None).await.unwrap();
    assert!(path.is_file());

    assert_eq!(cache.get("foo").await.unwrap().as_deref(), Some("bar"));
    assert!(!path.exists());
    assert_eq!(cache.tiers()[1].entry_ttl("foo").await.unwrap(), None);
    let ttl = cache.get_ttl(Some("foo")).await.unwrap();
    assert!(ttl > Ttl::Finite(Duration::from_secs(3590)));
}

#[tokio::test]
async fn test_shared_tier_is_extended_on_read() {
    let (cache, _cache_dir) = setup_cache(
        r#"
        tiers:
          - type: memory
          - type: filesystem
            path: $CACHE_DIR/shared
            ttl: 2h
            shared: true
        "#,
    );
    assert!(cache.is_shared());

    let tiers = cache.tiers();
    tiers[0]
        .set("foo", "bar".into(), Some(Duration::from_secs(3600)))
        .await
        .unwrap();
    tiers[1]
        .set("foo", "bar".into(), Some(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(cache.get("foo").await.unwrap().as_deref(), Some("bar"));
    let ttl = tiers[1].entry_ttl("foo").await.unwrap().unwrap();
    assert!(ttl > Ttl::Finite(Duration::from_secs(3590)));
    assert!(ttl <= Ttl::Finite(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_del_and_clear() {
    let (cache, cache_dir) = setup_cache(MEMORY_AND_FS);

    cache.set("foo", "bar".into(), None).await.unwrap();
    cache.set("baz", "qux".into(), None).await.unwrap();

    assert!(cache.del("foo").await.unwrap());
    assert!(!cache.del("foo").await.unwrap());
    assert!(!record_path(&cache_dir.path().join("shared"), "foo").exists());
    assert_eq!(cache.tracked_keys(), ["baz"]);

    // one copy in each tier
    assert_eq!(cache.clear().await.unwrap(), 2);
    assert_eq!(cache.clear().await.unwrap(), 0);
    assert!(cache.tracked_keys().is_empty());
    assert_eq!(cache.get("baz").await.unwrap(), None);
}

#[tokio::test]
async fn test_update_ttl() {
    let (cache, _cache_dir) = setup_cache(MEMORY_AND_FS);

    cache
        .set("foo", "bar".into(), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    cache.update_ttl("foo", Some(Ttl::Unbounded)).await.unwrap();
    assert_eq!(cache.effective_ttl("foo"), Some(Ttl::Unbounded));

    sleep_ms(300).await;
    assert_eq!(cache.get("foo").await.unwrap().as_deref(), Some("bar"));
    assert_eq!(cache.get_ttl(Some("foo")).await.unwrap(), Ttl::Unbounded);
}
