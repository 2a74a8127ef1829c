use std::time::Duration;

use tiercache::caching::{CacheError, Tier, TierError};

use crate::utils::{record_path, setup_cache, sleep_ms};

#[tokio::test]
async fn test_pending_computation_is_persisted() {
    let (cache, cache_dir) = setup_cache(
        r#"
        tiers:
          - type: memory
          - type: filesystem
            path: $CACHE_DIR/fs
        "#,
    );

    let computation = async {
        sleep_ms(100).await;
        Ok::<_, std::io::Error>("computed".to_owned())
    };
    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.set_pending("foo", computation, None).await })
    };

    // readers wait for the computation instead of missing
    tokio::task::yield_now().await;
    sleep_ms(10).await;
    assert_eq!(cache.pending_count(), 1);
    let (first, second) = tokio::join!(cache.get("foo"), cache.get("foo"));
    assert_eq!(first.unwrap().as_deref(), Some("computed"));
    assert_eq!(second.unwrap().as_deref(), Some("computed"));

    assert_eq!(writer.await.unwrap().unwrap(), "computed");
    assert_eq!(cache.pending_count(), 0);
    assert!(record_path(&cache_dir.path().join("fs"), "foo").is_file());
    assert!(cache.entry_info("foo").is_some());
}

#[tokio::test]
async fn test_corrupted_record() {
    let (cache, cache_dir) = setup_cache(
        r#"
        tiers:
          - type: memory
          - type: filesystem
            path: $CACHE_DIR/fs
        "#,
    );
    let path = record_path(&cache_dir.path().join("fs"), "foo");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"foo").unwrap();

    let err = cache.tiers()[1].get("foo").await.unwrap_err();
    assert!(matches!(err, TierError::Corrupted(_)));

    // the broken record was evicted
    assert!(!path.exists());
    assert_eq!(cache.get("foo").await.unwrap(), None);

    // failures of tiers that are not rejection safe reach the caller
    std::fs::write(&path, b"bar").unwrap();
    match cache.update_ttl("foo", None).await {
        Err(CacheError::Tier { tier, source }) => {
            assert_eq!(tier, 1);
            assert!(matches!(*source, TierError::Corrupted(_)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_safe_tier() {
    let (cache, cache_dir) = setup_cache(
        r#"
        tiers:
          - type: memory
          - type: filesystem
            path: $CACHE_DIR/fs
            rejection_safe: true
        "#,
    );
    assert!(cache.rejection_safe());

    let path = record_path(&cache_dir.path().join("fs"), "foo");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"foo").unwrap();
    assert_eq!(cache.get("foo").await.unwrap(), None);

    // values found in the file system are backfilled in the background
    cache.tiers()[1]
        .set("bar", "baz".into(), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(cache.get("bar").await.unwrap().as_deref(), Some("baz"));
    sleep_ms(100).await;
    assert_eq!(
        cache.tiers()[0].get("bar").await.unwrap().as_deref(),
        Some("baz")
    );
}
