//! Per-job cache restoration.

use super::{CacheStore, SubcomponentCacheKey, SubcomponentRegistry};
use crate::error::{CacheError, Result};
use crate::matrix::BuildJob;
use crate::retry::{RetryPolicy, retry_with_backoff};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Packages restored for one subcomponent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredPackage {
    /// Key the packages were found under
    pub key: SubcomponentCacheKey,
    /// Files written into the job's channel
    pub files: Vec<PathBuf>,
}

/// Cache state handed to the build executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRestoration {
    /// Cache not used; the executor builds every subcomponent from source
    Bypassed,
    /// Every registered subcomponent was restored
    Restored(Vec<RestoredPackage>),
}

impl CacheRestoration {
    /// Whether subcomponents must be built from source
    pub fn is_bypassed(&self) -> bool {
        matches!(self, CacheRestoration::Bypassed)
    }
}

/// Computes keys and restores cached packages for jobs
#[derive(Clone)]
pub struct CacheCoordinator {
    registry: SubcomponentRegistry,
    store: Arc<dyn CacheStore>,
    runtime_version: String,
    retry: RetryPolicy,
}

impl CacheCoordinator {
    /// Coordinator over `store` for the given registry
    pub fn new(
        registry: SubcomponentRegistry,
        store: Arc<dyn CacheStore>,
        runtime_version: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            runtime_version: runtime_version.into(),
            retry,
        }
    }

    /// Subcomponent registry
    pub fn registry(&self) -> &SubcomponentRegistry {
        &self.registry
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Keys of every registered subcomponent for one architecture
    pub async fn keys_for(
        &self,
        arch_tag: &str,
        source_root: &Path,
    ) -> Result<Vec<SubcomponentCacheKey>> {
        let mut keys = Vec::with_capacity(self.registry.components().len());
        for component in self.registry.components() {
            keys.push(
                SubcomponentCacheKey::derive(component, arch_tag, &self.runtime_version, source_root)
                    .await?,
            );
        }
        Ok(keys)
    }

    /// Restore every subcomponent for `job` into `dest`.
    ///
    /// Bypassed entirely when the job does not use cached subcomponents.
    /// Otherwise any miss is [`CacheError::Unavailable`]; the lookup is exact
    /// and a miss is never retried. Only store failures are retried.
    pub async fn restore_for_job(
        &self,
        job: &BuildJob,
        source_root: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<CacheRestoration> {
        if !job.flags.use_cached_subcomponents {
            log::info!("[{}] Subcomponent cache bypassed; building from source", job.id);
            return Ok(CacheRestoration::Bypassed);
        }

        let mut restored = Vec::new();
        for key in self.keys_for(&job.target.arch_tag, source_root).await? {
            let store = Arc::clone(&self.store);
            let lookup = key.clone();
            let files = retry_with_backoff(
                || {
                    let store = Arc::clone(&store);
                    let lookup = lookup.clone();
                    async move { store.restore(&lookup, dest).await }
                },
                &self.retry,
                &format!("cache restore {}", key.component),
                cancel,
            )
            .await?;

            match files {
                Some(files) => {
                    log::info!("[{}] Restored {} from cache", job.id, key);
                    restored.push(RestoredPackage { key, files });
                }
                None => {
                    log::warn!("[{}] No cached package for {}", job.id, key);
                    return Err(CacheError::Unavailable {
                        component: key.component.clone(),
                        key: key.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(CacheRestoration::Restored(restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheStore;
    use crate::config::PipelineConfig;
    use crate::matrix::{BranchSelection, BuildMatrix, Platform, TargetDescriptor};
    use crate::trigger::{EventKind, TriggerEvent, classify};
    use std::time::Duration;

    fn job(kind: EventKind) -> BuildJob {
        BuildMatrix {
            targets: vec![TargetDescriptor::new(Platform::Linux)],
            branches: BranchSelection::current(),
        }
        .jobs(classify(&TriggerEvent::new(kind)))
        .remove(0)
    }

    fn checkout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for component in &PipelineConfig::default().subcomponents {
            let marker = dir.path().join(&component.marker);
            std::fs::create_dir_all(marker.parent().expect("parent")).expect("mkdir");
            std::fs::write(&marker, format!("commit = {}\n", component.name)).expect("write");
        }
        dir
    }

    fn coordinator(cache: &Path) -> CacheCoordinator {
        let config = PipelineConfig::default();
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::with_retries(1)
        };
        CacheCoordinator::new(
            SubcomponentRegistry::from_config(&config.subcomponents),
            Arc::new(LocalCacheStore::new(cache)),
            config.runtime_version,
            policy,
        )
    }

    #[tokio::test]
    async fn bypassed_when_cache_not_used() {
        let cache = tempfile::tempdir().expect("tempdir");
        let dest = tempfile::tempdir().expect("tempdir");
        let restoration = coordinator(cache.path())
            .restore_for_job(
                &job(EventKind::ReleaseCreated),
                Path::new("/nonexistent"),
                dest.path(),
                &CancellationToken::new(),
            )
            .await
            .expect("bypass");
        assert!(restoration.is_bypassed());
    }

    #[tokio::test]
    async fn miss_is_cache_unavailable() {
        let cache = tempfile::tempdir().expect("tempdir");
        let dest = tempfile::tempdir().expect("tempdir");
        let source = checkout();
        let err = coordinator(cache.path())
            .restore_for_job(
                &job(EventKind::PullRequest),
                source.path(),
                dest.path(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("empty cache");
        assert!(err.is_cache_miss());
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn restores_every_registered_component() {
        let cache = tempfile::tempdir().expect("tempdir");
        let dest = tempfile::tempdir().expect("tempdir");
        let source = checkout();
        let coordinator = coordinator(cache.path());

        for key in coordinator.keys_for("linux-64", source.path()).await.expect("keys") {
            let package = tempfile::tempdir().expect("tempdir");
            std::fs::write(
                package.path().join(format!("{}.conda", key.component)),
                b"pkg",
            )
            .expect("write");
            coordinator
                .store()
                .save(&key, package.path())
                .await
                .expect("save");
        }

        let restoration = coordinator
            .restore_for_job(
                &job(EventKind::PullRequest),
                source.path(),
                dest.path(),
                &CancellationToken::new(),
            )
            .await
            .expect("restored");
        match restoration {
            CacheRestoration::Restored(packages) => assert_eq!(packages.len(), 3),
            CacheRestoration::Bypassed => panic!("expected restoration"),
        }
        assert!(dest.path().join("qtconsole.conda").is_file());
    }
}
