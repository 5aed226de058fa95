//! Installer builder collaborator.

use super::BuildEnvironment;
use crate::config::CommandsConfig;
use crate::error::{BuildError, Result};
use crate::matrix::BuildJob;
use crate::process::{CommandTemplate, Placeholders, run_command};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the installer builder hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Installer path
    pub artifact_path: PathBuf,
    /// Product version packed into the installer
    pub version: String,
}

/// JSON report the installer builder writes to `{report}`
///
/// ```json
/// { "artifact_path": "dist/Spyder-6.0.0-osx-arm64.pkg", "version": "6.0.0" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderReport {
    /// Installer path; relative paths resolve against the output directory
    pub artifact_path: PathBuf,
    /// Product version
    pub version: String,
}

/// Inputs for building one subcomponent package from source
#[derive(Debug, Clone)]
pub struct SubcomponentBuildRequest<'a> {
    /// Subcomponent name
    pub component: &'a str,
    /// Architecture tag
    pub arch_tag: &'a str,
    /// Language-runtime version
    pub runtime_version: &'a str,
    /// Source checkout
    pub source_root: &'a Path,
    /// Where the built package goes
    pub output_dir: &'a Path,
}

/// Builds packages and installers for a target
#[async_trait]
pub trait InstallerBuilder: Send + Sync {
    /// Build one subcomponent package into `request.output_dir`
    async fn build_subcomponent(&self, request: &SubcomponentBuildRequest<'_>) -> Result<()>;

    /// Rebuild the top-level package from source into the environment channel
    async fn rebuild_package(
        &self,
        job: &BuildJob,
        env: &BuildEnvironment,
        source_root: &Path,
    ) -> Result<()>;

    /// Build the installer against the environment's package set
    async fn build_installer(
        &self,
        job: &BuildJob,
        env: &BuildEnvironment,
        source_root: &Path,
    ) -> Result<BuildOutput>;
}

/// [`InstallerBuilder`] backed by external commands
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    product_name: String,
    rebuild_package: CommandTemplate,
    build_subcomponent: CommandTemplate,
    build_installer: CommandTemplate,
}

impl CommandBuilder {
    /// Builder using the configured commands
    pub fn new(product_name: impl Into<String>, commands: &CommandsConfig) -> Self {
        Self {
            product_name: product_name.into(),
            rebuild_package: commands.rebuild_package.clone(),
            build_subcomponent: commands.build_subcomponent.clone(),
            build_installer: commands.build_installer.clone(),
        }
    }

    /// Read and validate the builder's JSON report
    pub async fn read_report(report_path: &Path, output_dir: &Path) -> Result<BuildOutput> {
        let invalid = |reason: String| BuildError::InvalidReport {
            path: report_path.to_path_buf(),
            reason,
        };

        let contents = tokio::fs::read_to_string(report_path)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let report: BuilderReport =
            serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;

        if report.version.trim().is_empty() {
            return Err(invalid("empty version string".to_string()).into());
        }
        if report.artifact_path.as_os_str().is_empty() {
            return Err(invalid("empty artifact path".to_string()).into());
        }

        let artifact_path = if report.artifact_path.is_absolute() {
            report.artifact_path
        } else {
            output_dir.join(report.artifact_path)
        };

        Ok(BuildOutput {
            artifact_path,
            version: report.version,
        })
    }
}

#[async_trait]
impl InstallerBuilder for CommandBuilder {
    async fn build_subcomponent(&self, request: &SubcomponentBuildRequest<'_>) -> Result<()> {
        let values = Placeholders::new()
            .with("product", self.product_name.clone())
            .with("component", request.component)
            .with("arch", request.arch_tag)
            .with("runtime", request.runtime_version)
            .with_path("source", request.source_root)
            .with_path("output", request.output_dir);
        let invocation = self
            .build_subcomponent
            .render(&values)
            .current_dir(request.source_root);

        let output = run_command(&invocation).await?;
        if !output.success() {
            return Err(BuildError::Subcomponent {
                component: request.component.to_string(),
                reason: output.failure_reason(),
            }
            .into());
        }
        Ok(())
    }

    async fn rebuild_package(
        &self,
        job: &BuildJob,
        env: &BuildEnvironment,
        source_root: &Path,
    ) -> Result<()> {
        let values = env
            .placeholders(job, source_root)
            .with("product", self.product_name.clone());
        let invocation = self
            .rebuild_package
            .render(&values)
            .current_dir(source_root)
            .envs(&env.vars);

        let output = run_command(&invocation).await?;
        if !output.success() {
            return Err(BuildError::PackageRebuild {
                target: job.target.platform_id().to_string(),
                reason: output.failure_reason(),
            }
            .into());
        }
        Ok(())
    }

    async fn build_installer(
        &self,
        job: &BuildJob,
        env: &BuildEnvironment,
        source_root: &Path,
    ) -> Result<BuildOutput> {
        let report_path = env.root.join("build-report.json");
        let values = env
            .placeholders(job, source_root)
            .with("product", self.product_name.clone())
            .with_path("report", &report_path);
        let invocation = self
            .build_installer
            .render(&values)
            .current_dir(source_root)
            .envs(&env.vars);

        let output = run_command(&invocation).await?;
        if !output.success() {
            return Err(BuildError::Installer {
                target: job.target.platform_id().to_string(),
                reason: output.failure_reason(),
            }
            .into());
        }

        Self::read_report(&report_path, &env.output_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn report_paths_resolve_against_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = dir.path().join("report.json");
        std::fs::write(
            &report,
            r#"{ "artifact_path": "Spyder-6.0.0-Linux-x86_64.sh", "version": "6.0.0" }"#,
        )
        .expect("write report");

        let output = CommandBuilder::read_report(&report, Path::new("/work/dist"))
            .await
            .expect("valid report");
        assert_eq!(
            output.artifact_path,
            Path::new("/work/dist").join("Spyder-6.0.0-Linux-x86_64.sh")
        );
        assert_eq!(output.version, "6.0.0");
    }

    #[tokio::test]
    async fn report_without_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = dir.path().join("report.json");
        std::fs::write(&report, r#"{ "artifact_path": "a.sh", "version": " " }"#)
            .expect("write report");

        let err = CommandBuilder::read_report(&report, dir.path())
            .await
            .expect_err("blank version");
        assert!(matches!(
            err,
            PipelineError::Build(BuildError::InvalidReport { .. })
        ));
    }

    #[tokio::test]
    async fn missing_report_is_a_build_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = CommandBuilder::read_report(&dir.path().join("nope.json"), dir.path())
            .await
            .expect_err("no report");
        assert_eq!(err.kind(), "build");
    }
}
