//! Per-job build driver.

use super::{
    Artifact, BuildEnvironment, EnvironmentProvisioner, InstallerBuilder, SubcomponentBuildRequest,
};
use crate::cache::{CacheRestoration, SubcomponentRegistry};
use crate::error::{BuildError, Result};
use crate::matrix::BuildJob;
use std::path::Path;
use std::sync::Arc;

/// Drives one job from a provisioned environment to an unsigned [`Artifact`]
pub struct PlatformBuildExecutor {
    provisioner: EnvironmentProvisioner,
    builder: Arc<dyn InstallerBuilder>,
    registry: SubcomponentRegistry,
}

impl PlatformBuildExecutor {
    /// Create an executor
    pub fn new(
        provisioner: EnvironmentProvisioner,
        builder: Arc<dyn InstallerBuilder>,
        registry: SubcomponentRegistry,
    ) -> Self {
        Self {
            provisioner,
            builder,
            registry,
        }
    }

    /// Provision the job's isolated environment
    pub async fn provision(&self, job: &BuildJob, source_root: &Path) -> Result<BuildEnvironment> {
        self.provisioner.provision(job, source_root).await
    }

    /// Build the installer for `job`.
    ///
    /// Release builds skip the top-level package rebuild because the package
    /// is already published. A bypassed cache means every subcomponent is
    /// built from source into the environment's channel first.
    pub async fn build(
        &self,
        job: &BuildJob,
        env: &BuildEnvironment,
        restoration: &CacheRestoration,
        source_root: &Path,
    ) -> Result<Artifact> {
        if restoration.is_bypassed() {
            for component in self.registry.components() {
                log::info!("[{}] Building {} from source", job.id, component.name);
                self.builder
                    .build_subcomponent(&SubcomponentBuildRequest {
                        component: &component.name,
                        arch_tag: &job.target.arch_tag,
                        runtime_version: &env.runtime_version,
                        source_root,
                        output_dir: &env.channel_dir,
                    })
                    .await?;
            }
        }

        if job.flags.release {
            log::info!("[{}] Release build, using the published package", job.id);
        } else {
            log::info!("[{}] Rebuilding top-level package", job.id);
            self.builder.rebuild_package(job, env, source_root).await?;
        }

        let output = self.builder.build_installer(job, env, source_root).await?;

        let metadata = tokio::fs::metadata(&output.artifact_path).await.ok();
        let usable = !output.artifact_path.as_os_str().is_empty()
            && metadata.is_some_and(|m| m.is_file() && m.len() > 0);
        if !usable {
            return Err(BuildError::MissingArtifact {
                path: output.artifact_path,
            }
            .into());
        }

        log::info!(
            "[{}] Built {} (version {})",
            job.id,
            output.artifact_path.display(),
            output.version
        );

        Ok(Artifact {
            job_id: job.id.clone(),
            path: output.artifact_path,
            version: output.version,
            platform: job.target.platform,
            signature: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildOutput;
    use crate::config::PipelineConfig;
    use crate::error::PipelineError;
    use crate::matrix::{BranchSelection, BuildMatrix, Platform, TargetDescriptor};
    use crate::trigger::{EventKind, TriggerEvent, classify};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBuilder {
        calls: Mutex<Vec<String>>,
        empty_artifact: bool,
    }

    #[async_trait]
    impl InstallerBuilder for RecordingBuilder {
        async fn build_subcomponent(&self, request: &SubcomponentBuildRequest<'_>) -> Result<()> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("subcomponent:{}", request.component));
            Ok(())
        }

        async fn rebuild_package(
            &self,
            _job: &BuildJob,
            _env: &BuildEnvironment,
            _source_root: &Path,
        ) -> Result<()> {
            self.calls.lock().expect("lock").push("rebuild".to_string());
            Ok(())
        }

        async fn build_installer(
            &self,
            _job: &BuildJob,
            env: &BuildEnvironment,
            _source_root: &Path,
        ) -> Result<BuildOutput> {
            self.calls.lock().expect("lock").push("installer".to_string());
            let path = env.output_dir.join("Spyder-Linux-x86_64.sh");
            let contents: &[u8] = if self.empty_artifact { b"" } else { b"#!/bin/sh\n" };
            std::fs::write(&path, contents).expect("write artifact");
            Ok(BuildOutput {
                artifact_path: path,
                version: "6.0.0".to_string(),
            })
        }
    }

    fn job(kind: EventKind) -> BuildJob {
        BuildMatrix {
            targets: vec![TargetDescriptor::new(Platform::Linux)],
            branches: BranchSelection::current(),
        }
        .jobs(classify(&TriggerEvent::new(kind)))
        .remove(0)
    }

    fn executor(work: &Path, builder: Arc<RecordingBuilder>) -> PlatformBuildExecutor {
        let config = PipelineConfig::default();
        PlatformBuildExecutor::new(
            EnvironmentProvisioner::new(work, "3.11", None),
            builder,
            SubcomponentRegistry::from_config(&config.subcomponents),
        )
    }

    #[tokio::test]
    async fn release_build_skips_package_rebuild() {
        let work = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(RecordingBuilder::default());
        let executor = executor(work.path(), Arc::clone(&builder));
        let job = job(EventKind::ReleaseCreated);

        let env = executor.provision(&job, work.path()).await.expect("env");
        let artifact = executor
            .build(&job, &env, &CacheRestoration::Bypassed, work.path())
            .await
            .expect("artifact");

        let calls = builder.calls.lock().expect("lock").clone();
        assert!(!calls.contains(&"rebuild".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("installer"));
        assert_eq!(
            calls.iter().filter(|c| c.starts_with("subcomponent:")).count(),
            3
        );
        assert_eq!(artifact.version, "6.0.0");
        assert_eq!(artifact.platform, Platform::Linux);
        assert!(artifact.signature.is_none());
    }

    #[tokio::test]
    async fn cached_non_release_build_rebuilds_package_only() {
        let work = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(RecordingBuilder::default());
        let executor = executor(work.path(), Arc::clone(&builder));
        let job = job(EventKind::PullRequest);

        let env = executor.provision(&job, work.path()).await.expect("env");
        executor
            .build(&job, &env, &CacheRestoration::Restored(Vec::new()), work.path())
            .await
            .expect("artifact");

        let calls = builder.calls.lock().expect("lock").clone();
        assert_eq!(calls, vec!["rebuild".to_string(), "installer".to_string()]);
    }

    #[tokio::test]
    async fn empty_artifact_is_rejected() {
        let work = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(RecordingBuilder {
            empty_artifact: true,
            ..RecordingBuilder::default()
        });
        let executor = executor(work.path(), builder);
        let job = job(EventKind::PullRequest);

        let env = executor.provision(&job, work.path()).await.expect("env");
        let err = executor
            .build(&job, &env, &CacheRestoration::Restored(Vec::new()), work.path())
            .await
            .expect_err("empty artifact");
        assert!(matches!(
            err,
            PipelineError::Build(BuildError::MissingArtifact { .. })
        ));
    }
}
