use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::store::Store;
use crate::caching::{ConfigError, TierError};

/// The maximum length of a file path on this platform.
pub const MAX_PATH: usize = if cfg!(windows) { 260 } else { 4096 };

/// The length a sharded record path adds to the root: `/aa/bbccdd/` followed by the remaining
/// 56 characters of a SHA-256 hex digest.
const SHARDED_SUFFIX_LEN: usize = 1 + 2 + 1 + 6 + 1 + 56;

/// Directory for temporary files, inside the root.
const TMP_DIR: &str = "tmp";

/// Directory for ids too short to be sharded, inside the root.
const FLAT_DIR: &str = "flat";

/// A [`Store`] keeping one file per record below a root directory.
///
/// Ids are sharded into `aa/bbccdd/rest` path segments, so that no single directory grows too
/// large. Records are first written into a temporary file which is then renamed into place, so
/// readers never observe partial records.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    tmp_dir: PathBuf,
}

impl FsStore {
    /// Opens the store at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        validate_root(&root)?;
        std::fs::create_dir_all(&root)?;

        let tmp_dir = root.join(TMP_DIR);
        Ok(Self { root, tmp_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the record file for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        let id = safe_path_segment(id);
        if id.len() > 8 && id.is_ascii() {
            self.root.join(&id[..2]).join(&id[2..8]).join(&id[8..])
        } else {
            self.root.join(FLAT_DIR).join(id)
        }
    }

    fn temp_file(&self) -> io::Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&self.tmp_dir)?;
        tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(&self.tmp_dir)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut temp_file = self.temp_file()?;
        temp_file.write_all(data)?;
        temp_file.flush()?;

        let Some(parent) = path.parent() else {
            return Err(io::Error::other("record path has no parent"));
        };

        // a concurrent `clear` may remove the shard directory between creating and persisting
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(err) = fs::create_dir_all(parent).await {
                tracing::error!(
                    path = %parent.display(),
                    error = &err as &dyn std::error::Error,
                    "Failed to create record directory"
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
                continue;
            }

            match temp_file.persist(path) {
                Ok(_) => return Ok(()),
                Err(err) => {
                    temp_file = err.file;
                    let err = err.error;
                    tracing::error!(
                        path = %path.display(),
                        error = &err as &dyn std::error::Error,
                        "Failed to persist record"
                    );
                    if retries > MAX_RETRIES {
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// Protect against:
/// * ".."
/// * absolute paths
/// * ":" (not a threat on POSIX filesystems, but confuses OS X Finder)
fn safe_path_segment(s: &str) -> String {
    s.replace(['.', '/', '\\', ':'], "_")
}

pub(crate) fn validate_root(root: &Path) -> Result<(), ConfigError> {
    let len = root.as_os_str().len() + SHARDED_SUFFIX_LEN;
    if len > MAX_PATH {
        return Err(ConfigError::PathTooLong {
            path: root.to_owned(),
            len,
            max: MAX_PATH,
        });
    }
    Ok(())
}

/// Counts all files below `path`.
fn count_files(path: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

fn remove_records(root: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == TMP_DIR {
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            count += count_files(&path)?;
            std::fs::remove_dir_all(&path)?;
        } else {
            count += 1;
            std::fs::remove_file(&path)?;
        }
    }
    Ok(count)
}

#[async_trait]
impl Store for FsStore {
    async fn create(&self, id: &str, data: Vec<u8>) -> Result<(), TierError> {
        let path = self.record_path(id);
        self.write(&path, &data).await?;
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>, TierError> {
        match fs::read(self.record_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, id: &str, data: Vec<u8>) -> Result<bool, TierError> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        self.write(&path, &data).await?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, TierError> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn clear(&self) -> Result<usize, TierError> {
        let root = self.root.clone();
        let count = tokio::task::spawn_blocking(move || remove_records(&root))
            .await
            .map_err(|err| TierError::Backend(err.to_string()))??;
        tracing::debug!(root = %self.root.display(), count, "Cleared file system store");
        Ok(count)
    }
}
