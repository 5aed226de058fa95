//! Run-global subcomponent production.
//!
//! Runs once per branch before any job of that branch restores from the
//! cache. Only keys missing from the store are built.

use super::{CacheCoordinator, SubcomponentCacheKey};
use crate::build::{InstallerBuilder, SubcomponentBuildRequest};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one production pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionReport {
    /// Keys built and stored during this pass
    pub built: Vec<SubcomponentCacheKey>,
    /// Keys already present in the store
    pub reused: Vec<SubcomponentCacheKey>,
}

/// Builds and stores missing subcomponent packages
pub struct SubcomponentProducer {
    coordinator: CacheCoordinator,
    builder: Arc<dyn InstallerBuilder>,
    staging_root: PathBuf,
}

impl SubcomponentProducer {
    /// Producer staging builds under `staging_root`
    pub fn new(
        coordinator: CacheCoordinator,
        builder: Arc<dyn InstallerBuilder>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            builder,
            staging_root: staging_root.into(),
        }
    }

    /// Make sure every key for `arch_tags` exists in the store
    pub async fn produce(
        &self,
        arch_tags: &[&str],
        source_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProductionReport> {
        let mut report = ProductionReport::default();
        let store = self.coordinator.store();

        for arch_tag in arch_tags {
            for key in self.coordinator.keys_for(arch_tag, source_root).await? {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }

                if store.contains(&key).await? {
                    log::debug!("Subcomponent {} already cached", key);
                    report.reused.push(key);
                    continue;
                }

                let staging = self.staging_root.join(key.to_string());
                if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
                    tokio::fs::remove_dir_all(&staging).await?;
                }
                tokio::fs::create_dir_all(&staging).await?;

                log::info!("Building subcomponent {} for {}", key.component, arch_tag);
                let request = SubcomponentBuildRequest {
                    component: &key.component,
                    arch_tag,
                    runtime_version: &key.runtime_version,
                    source_root,
                    output_dir: &staging,
                };

                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    built = self.builder.build_subcomponent(&request) => built?,
                }

                store.save(&key, &staging).await?;
                let _ = tokio::fs::remove_dir_all(&staging).await;
                report.built.push(key);
            }
        }

        log::info!(
            "Subcomponent production: {} built, {} reused",
            report.built.len(),
            report.reused.len()
        );
        Ok(report)
    }
}
