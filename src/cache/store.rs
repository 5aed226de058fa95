//! Cache store backends.

use super::SubcomponentCacheKey;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Storage for cached subcomponent packages.
///
/// Lookups are exact-match on the rendered key. Jobs only read; the
/// subcomponent production stage is the only writer.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether a package set exists for `key`
    async fn contains(&self, key: &SubcomponentCacheKey) -> Result<bool>;

    /// Copy the cached files for `key` into `dest`.
    ///
    /// Returns `None` on a miss, otherwise the restored file paths.
    async fn restore(&self, key: &SubcomponentCacheKey, dest: &Path)
    -> Result<Option<Vec<PathBuf>>>;

    /// Store every file under `source_dir` for `key`
    async fn save(&self, key: &SubcomponentCacheKey, source_dir: &Path) -> Result<()>;
}

/// Directory-backed [`CacheStore`]: one directory per rendered key
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    root: PathBuf,
}

impl LocalCacheStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &SubcomponentCacheKey) -> PathBuf {
        self.root.join(key.to_string())
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn contains(&self, key: &SubcomponentCacheKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.entry_dir(key))
            .await
            .map_err(store_error)?)
    }

    async fn restore(
        &self,
        key: &SubcomponentCacheKey,
        dest: &Path,
    ) -> Result<Option<Vec<PathBuf>>> {
        let entry = self.entry_dir(key);
        if !self.contains(key).await? {
            log::debug!("Cache miss for {}", key);
            return Ok(None);
        }

        let dest = dest.to_path_buf();
        let restored = tokio::task::spawn_blocking(move || copy_tree(&entry, &dest))
            .await
            .map_err(|e| CacheError::Store {
                reason: format!("restore task failed: {}", e),
            })??;

        log::debug!("Restored {} file(s) for {}", restored.len(), key);
        Ok(Some(restored))
    }

    async fn save(&self, key: &SubcomponentCacheKey, source_dir: &Path) -> Result<()> {
        let entry = self.entry_dir(key);
        let partial = self.root.join(format!(".{}.partial-{}", key, uuid::Uuid::new_v4()));

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(store_error)?;

        let source = source_dir.to_path_buf();
        let staging = partial.clone();
        tokio::task::spawn_blocking(move || copy_tree(&source, &staging))
            .await
            .map_err(|e| CacheError::Store {
                reason: format!("save task failed: {}", e),
            })??;

        // A concurrent producer may have won the race; identical key means identical content.
        if tokio::fs::try_exists(&entry).await.map_err(store_error)? {
            let _ = tokio::fs::remove_dir_all(&partial).await;
            return Ok(());
        }

        tokio::fs::rename(&partial, &entry)
            .await
            .map_err(store_error)?;
        log::info!("Cached {}", key);
        Ok(())
    }
}

fn store_error(e: std::io::Error) -> CacheError {
    CacheError::Store {
        reason: e.to_string(),
    }
}

/// Copy every regular file under `from` into `to`, keeping relative paths
fn copy_tree(from: &Path, to: &Path) -> std::result::Result<Vec<PathBuf>, CacheError> {
    std::fs::create_dir_all(to).map_err(store_error)?;

    let mut copied = Vec::new();
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| CacheError::Store {
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| CacheError::Store {
                reason: e.to_string(),
            })?;
        let target = to.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(store_error)?;
        }
        std::fs::copy(entry.path(), &target).map_err(store_error)?;
        copied.push(target);
    }
    Ok(copied)
}
