use std::path::{Path, PathBuf};

use tiercache::caching::TieredCache;
use tiercache::config::Config;
use tiercache::tiers::{FsStore, sha256_hex};
use tiercache_test as test;

pub use test::TempDir;

/// Setup tests and create a cache from a YAML config.
///
/// Every `$CACHE_DIR` in `yaml` is replaced with a fresh temporary directory. That directory is
/// returned alongside the cache, keep it as guard until the test has finished.
pub fn setup_cache(yaml: &str) -> (TieredCache<String>, TempDir) {
    test::setup();

    let cache_dir = test::tempdir();
    let cache = open_cache(yaml, cache_dir.path());
    (cache, cache_dir)
}

/// Creates a cache from a YAML config, with `$CACHE_DIR` pointing at `cache_dir`.
pub fn open_cache(yaml: &str, cache_dir: &Path) -> TieredCache<String> {
    let yaml = yaml.replace("$CACHE_DIR", &cache_dir.display().to_string());
    let config = Config::from_reader(yaml.as_bytes()).unwrap();
    TieredCache::from_config(&config).unwrap()
}

/// Returns the path at which a file system tier rooted in `root` stores `key`.
pub fn record_path(root: &Path, key: &str) -> PathBuf {
    FsStore::new(root).unwrap().record_path(&sha256_hex(key))
}

pub async fn sleep_ms(millis: u64) {
    test::sleep_ms(millis).await
}
