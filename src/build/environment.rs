//! Isolated per-job build environments.

use crate::error::{BuildError, Result};
use crate::matrix::BuildJob;
use crate::process::{CommandTemplate, Placeholders, run_command};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directories and variables of one job's environment.
///
/// Variables in `vars` are passed to child processes only; the pipeline
/// never mutates its own process environment.
#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    /// Environment root, exclusive to the job
    pub root: PathBuf,
    /// Local package channel (restored or freshly built packages)
    pub channel_dir: PathBuf,
    /// Installer output directory
    pub output_dir: PathBuf,
    /// Prefix the verifier installs into
    pub install_prefix: PathBuf,
    /// Scratch space for signing material
    pub scratch_dir: PathBuf,
    /// Pinned language-runtime version
    pub runtime_version: String,
    /// Variables for child processes
    pub vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Placeholders shared by every command run inside this environment
    pub fn placeholders(&self, job: &BuildJob, source_root: &Path) -> Placeholders {
        Placeholders::new()
            .with("platform", job.target.platform_id())
            .with("arch", job.target.arch_tag.clone())
            .with("runner", job.target.runner_class.clone())
            .with("branch", job.branch.name())
            .with("runtime", self.runtime_version.clone())
            .with_path("source", source_root)
            .with_path("env", &self.root)
            .with_path("channel", &self.channel_dir)
            .with_path("output", &self.output_dir)
            .with_path("prefix", &self.install_prefix)
    }
}

/// Creates a fresh [`BuildEnvironment`] per job
#[derive(Debug, Clone)]
pub struct EnvironmentProvisioner {
    work_root: PathBuf,
    runtime_version: String,
    provision: Option<CommandTemplate>,
}

impl EnvironmentProvisioner {
    /// Provisioner rooted at `work_root`, pinned to `runtime_version`
    pub fn new(
        work_root: impl Into<PathBuf>,
        runtime_version: impl Into<String>,
        provision: Option<CommandTemplate>,
    ) -> Self {
        Self {
            work_root: work_root.into(),
            runtime_version: runtime_version.into(),
            provision,
        }
    }

    /// Provision a clean environment for `job`.
    ///
    /// Any leftover directory from an earlier run of the same job is removed
    /// first, so no state leaks between runs.
    pub async fn provision(&self, job: &BuildJob, source_root: &Path) -> Result<BuildEnvironment> {
        let root = self.work_root.join(job.id.dir_name());
        let fail = |reason: String| BuildError::Provision {
            target: job.target.platform_id().to_string(),
            reason,
        };

        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| fail(format!("cannot clear {}: {}", root.display(), e)))?;
        }

        let env = BuildEnvironment {
            channel_dir: root.join("channel"),
            output_dir: root.join("dist"),
            install_prefix: root.join("install"),
            scratch_dir: root.join("scratch"),
            runtime_version: self.runtime_version.clone(),
            vars: Self::variables(job, &self.runtime_version),
            root,
        };

        for dir in [&env.channel_dir, &env.output_dir, &env.scratch_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| fail(format!("cannot create {}: {}", dir.display(), e)))?;
        }

        if let Some(template) = &self.provision {
            let invocation = template
                .render(&env.placeholders(job, source_root))
                .current_dir(source_root)
                .envs(&env.vars);
            let output = run_command(&invocation).await?;
            if !output.success() {
                return Err(fail(output.failure_reason()).into());
            }
        }

        log::info!(
            "[{}] Environment ready at {} (runtime {})",
            job.id,
            env.root.display(),
            env.runtime_version
        );
        Ok(env)
    }

    fn variables(job: &BuildJob, runtime_version: &str) -> BTreeMap<String, String> {
        let flag = |value: bool| if value { "true" } else { "false" }.to_string();
        BTreeMap::from([
            ("KODEGEN_TARGET_PLATFORM".to_string(), job.target.platform_id().to_string()),
            ("KODEGEN_TARGET_ARCH".to_string(), job.target.arch_tag.clone()),
            ("KODEGEN_RUNTIME_VERSION".to_string(), runtime_version.to_string()),
            ("KODEGEN_PRE_RELEASE".to_string(), flag(job.flags.pre_release)),
            ("KODEGEN_RELEASE".to_string(), flag(job.flags.release)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BranchSelection, BuildMatrix, Platform, TargetDescriptor};
    use crate::trigger::{EventKind, TriggerEvent, classify};

    fn linux_job() -> BuildJob {
        let matrix = BuildMatrix {
            targets: vec![TargetDescriptor::new(Platform::Linux)],
            branches: BranchSelection::current(),
        };
        matrix
            .jobs(classify(&TriggerEvent::new(EventKind::PullRequest)))
            .remove(0)
    }

    #[tokio::test]
    async fn provision_creates_clean_directories() {
        let work = tempfile::tempdir().expect("tempdir");
        let provisioner = EnvironmentProvisioner::new(work.path(), "3.11", None);
        let job = linux_job();

        let first = provisioner
            .provision(&job, work.path())
            .await
            .expect("provisioned");
        std::fs::write(first.output_dir.join("stale.sh"), b"old").expect("write");

        let second = provisioner
            .provision(&job, work.path())
            .await
            .expect("re-provisioned");
        assert_eq!(first.root, second.root);
        assert!(second.channel_dir.is_dir());
        assert!(!second.output_dir.join("stale.sh").exists());
        assert_eq!(second.vars["KODEGEN_TARGET_ARCH"], "linux-64");
        assert_eq!(second.vars["KODEGEN_RUNTIME_VERSION"], "3.11");
    }
}
