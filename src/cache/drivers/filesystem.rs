//! Filesystem driver.
//!
//! Each entry is a pair of files named after the SHA-256 of its key:
//! `<digest>.bin` holds the payload and `<digest>.key` the original key, so
//! wildcard purges can scan keys without hashing guesses.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;

use crate::cache::driver::{CacheDriver, DriverKind, Existence};
use crate::cache::keys::{CacheKey, KeySet};

const PAYLOAD_EXT: &str = "bin";
const KEY_EXT: &str = "key";

#[derive(Debug, Clone)]
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(key: &CacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, stem: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{stem}.{ext}"))
    }

    /// Remove both files of an entry; a missing file is not an error.
    async fn remove_entry(&self, stem: &str) -> bool {
        let mut removed = true;
        for ext in [PAYLOAD_EXT, KEY_EXT] {
            let path = self.path_for(stem, ext);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "Failed to remove cache file");
                    removed = false;
                }
            }
        }
        removed
    }

    /// Stems of every stored key covered by `pattern`.
    async fn matching_stems(&self, pattern: &CacheKey) -> std::io::Result<Vec<String>> {
        let mut stems = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(stems),
            Err(err) => return Err(err),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let stored = match fs::read_to_string(&path).await {
                Ok(stored) => stored,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            if pattern.covers(&stored) {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }
}

#[async_trait]
impl CacheDriver for FilesystemDriver {
    fn id(&self) -> &'static str {
        "filesystem"
    }

    fn label(&self) -> &str {
        "Filesystem store"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Filesystem
    }

    async fn probe(&self) -> bool {
        fs::create_dir_all(&self.root).await.is_ok()
    }

    async fn raw_exists(&self, key: &CacheKey) -> Existence {
        let path = self.path_for(&Self::stem(key), PAYLOAD_EXT);
        match fs::try_exists(&path).await {
            Ok(true) => Existence::Cached,
            Ok(false) => Existence::NotCached,
            Err(_) => Existence::Indeterminate,
        }
    }

    async fn raw_get(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.path_for(&Self::stem(key), PAYLOAD_EXT);
        match fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to read cache file");
                None
            }
        }
    }

    async fn raw_set(&self, key: &CacheKey, value: Bytes) -> bool {
        let stem = Self::stem(key);
        let written = async {
            fs::create_dir_all(&self.root).await?;
            fs::write(self.path_for(&stem, PAYLOAD_EXT), &value).await?;
            fs::write(self.path_for(&stem, KEY_EXT), key.as_str()).await
        }
        .await;

        match written {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, key = %key, "Failed to write cache entry");
                self.remove_entry(&stem).await;
                false
            }
        }
    }

    async fn raw_delete(&self, keys: &KeySet) -> bool {
        let mut success = true;
        for key in keys {
            if !key.is_wildcard() {
                success &= self.remove_entry(&Self::stem(key)).await;
                continue;
            }
            match self.matching_stems(key).await {
                Ok(stems) => {
                    for stem in stems {
                        success &= self.remove_entry(&stem).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, pattern = %key, "Failed to scan cache directory");
                    success = false;
                }
            }
        }
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::key_set;

    #[tokio::test]
    async fn stores_payload_and_key_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FilesystemDriver::new(dir.path().join("pages"));
        let key = CacheKey::from("http://example.com/a");

        assert!(driver.probe().await);
        assert!(driver.raw_set(&key, Bytes::from_static(b"<html>")).await);
        assert_eq!(driver.raw_exists(&key).await, Existence::Cached);
        assert_eq!(
            driver.raw_get(&key).await,
            Some(Bytes::from_static(b"<html>"))
        );

        let stem = FilesystemDriver::stem(&key);
        let stored = std::fs::read_to_string(driver.path_for(&stem, KEY_EXT)).expect("key file");
        assert_eq!(stored, "http://example.com/a");
    }

    #[tokio::test]
    async fn delete_of_missing_entry_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FilesystemDriver::new(dir.path());
        assert!(driver.raw_delete(&key_set(["http://example.com/gone"])).await);
    }

    #[tokio::test]
    async fn wildcard_delete_scans_stored_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = FilesystemDriver::new(dir.path());
        for key in ["http://example.com/a", "http://example.com/b/c", "http://other.org/"] {
            assert!(driver.raw_set(&CacheKey::from(key), Bytes::new()).await);
        }

        assert!(driver.raw_delete(&key_set(["http://example.com/*"])).await);

        assert_eq!(
            driver.raw_exists(&CacheKey::from("http://example.com/a")).await,
            Existence::NotCached
        );
        assert_eq!(
            driver.raw_exists(&CacheKey::from("http://example.com/b/c")).await,
            Existence::NotCached
        );
        assert_eq!(
            driver.raw_exists(&CacheKey::from("http://other.org/")).await,
            Existence::Cached
        );
    }
}
