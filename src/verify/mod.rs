//! Installer verification.
//!
//! The installer is executed unattended into a clean prefix, then the
//! installed product reports its own version. That string must equal the
//! version the builder reported, byte for byte. No normalization.

use crate::build::{Artifact, BuildEnvironment};
use crate::config::CommandsConfig;
use crate::error::{PipelineError, Result, VerifyError};
use crate::matrix::{BuildJob, OsFamily, TargetDescriptor};
use crate::process::{CommandTemplate, Placeholders, run_command};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs installers and queries the installed product
#[async_trait]
pub trait InstallerRunner: Send + Sync {
    /// Install `artifact` unattended into `prefix`
    async fn install(&self, artifact: &Path, target: &TargetDescriptor, prefix: &Path) -> Result<()>;

    /// Version string reported by the product installed in `prefix`
    async fn installed_version(&self, target: &TargetDescriptor, prefix: &Path) -> Result<String>;
}

/// [`InstallerRunner`] backed by the configured install and version commands
#[derive(Debug, Clone)]
pub struct CommandInstallerRunner {
    commands: CommandsConfig,
    install_timeout: Duration,
}

impl CommandInstallerRunner {
    /// Runner with the given commands; installs are killed after `install_timeout`
    pub fn new(commands: CommandsConfig, install_timeout: Duration) -> Self {
        Self {
            commands,
            install_timeout,
        }
    }

    fn install_template(&self, target: &TargetDescriptor) -> &CommandTemplate {
        match target.platform.family() {
            OsFamily::Windows => &self.commands.install_windows,
            OsFamily::Macos => &self.commands.install_macos,
            OsFamily::Linux => &self.commands.install_linux,
        }
    }

    fn version_template(&self, target: &TargetDescriptor) -> &CommandTemplate {
        match target.platform.family() {
            OsFamily::Windows => &self.commands.version_windows,
            OsFamily::Macos => &self.commands.version_macos,
            OsFamily::Linux => &self.commands.version_unix,
        }
    }
}

#[async_trait]
impl InstallerRunner for CommandInstallerRunner {
    async fn install(&self, artifact: &Path, target: &TargetDescriptor, prefix: &Path) -> Result<()> {
        let values = Placeholders::new()
            .with_path("artifact", artifact)
            .with_path("prefix", prefix)
            .with("arch", target.arch_tag.clone());
        let invocation = self
            .install_template(target)
            .render(&values)
            .timeout(self.install_timeout);

        let output = match run_command(&invocation).await {
            Ok(output) => output,
            Err(PipelineError::Timeout { seconds, .. }) => {
                return Err(VerifyError::InstallFailed {
                    artifact: artifact.to_path_buf(),
                    reason: format!("installer did not finish within {:.0}s", seconds),
                }
                .into());
            }
            Err(e) => return Err(e),
        };
        if !output.success() {
            return Err(VerifyError::InstallFailed {
                artifact: artifact.to_path_buf(),
                reason: output.failure_reason(),
            }
            .into());
        }
        Ok(())
    }

    async fn installed_version(&self, target: &TargetDescriptor, prefix: &Path) -> Result<String> {
        let values = Placeholders::new().with_path("prefix", prefix);
        let invocation = self
            .version_template(target)
            .render(&values)
            .timeout(Duration::from_secs(120));

        let output = run_command(&invocation).await.map_err(|e| VerifyError::VersionProbe {
            reason: e.to_string(),
        })?;
        if !output.success() {
            return Err(VerifyError::VersionProbe {
                reason: output.failure_reason(),
            }
            .into());
        }
        Ok(decode_version_output(&output.stdout))
    }
}

/// Strip the trailing line terminator a version probe prints.
///
/// Only `\n` and `\r` at the very end are removed; everything else,
/// including surrounding spaces, is part of the version.
pub fn decode_version_output(stdout: &str) -> String {
    stdout.trim_end_matches(['\n', '\r']).to_string()
}

/// Exact-equality version check
pub fn check_version(expected: &str, actual: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(VerifyError::Mismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }
}

/// Installs an artifact and checks the installed version
#[derive(Clone)]
pub struct InstallerVerifier {
    runner: Arc<dyn InstallerRunner>,
}

impl InstallerVerifier {
    /// Verifier over `runner`
    pub fn new(runner: Arc<dyn InstallerRunner>) -> Self {
        Self { runner }
    }

    /// Verify `artifact` in the job's clean install prefix.
    ///
    /// Failures are never retried: they indicate a packaging defect.
    pub async fn verify(
        &self,
        artifact: &Artifact,
        job: &BuildJob,
        env: &BuildEnvironment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let prefix = &env.install_prefix;
        if tokio::fs::try_exists(prefix).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(prefix).await?;
        }

        let actual = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            actual = self.install_and_probe(artifact, job, prefix) => actual?,
        };

        check_version(&artifact.version, &actual)?;
        log::info!("[{}] ✓ Installed version {} verified", job.id, actual);
        Ok(())
    }

    async fn install_and_probe(
        &self,
        artifact: &Artifact,
        job: &BuildJob,
        prefix: &Path,
    ) -> Result<String> {
        log::info!("[{}] Installing {} into {}", job.id, artifact.file_name(), prefix.display());
        self.runner.install(&artifact.path, &job.target, prefix).await?;
        self.runner.installed_version(&job.target, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::EnvironmentProvisioner;
    use crate::matrix::{BranchSelection, BuildMatrix, Platform};
    use crate::trigger::{EventKind, TriggerEvent, classify};

    struct FixedVersion(&'static str);

    #[async_trait]
    impl InstallerRunner for FixedVersion {
        async fn install(&self, _artifact: &Path, _target: &TargetDescriptor, prefix: &Path) -> Result<()> {
            tokio::fs::create_dir_all(prefix).await?;
            Ok(())
        }

        async fn installed_version(&self, _target: &TargetDescriptor, _prefix: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    async fn fixture(work: &Path) -> (Artifact, BuildJob, BuildEnvironment) {
        let job = BuildMatrix {
            targets: vec![TargetDescriptor::new(Platform::Linux)],
            branches: BranchSelection::current(),
        }
        .jobs(classify(&TriggerEvent::new(EventKind::PullRequest)))
        .remove(0);
        let env = EnvironmentProvisioner::new(work, "3.11", None)
            .provision(&job, work)
            .await
            .expect("env");
        let artifact = Artifact {
            job_id: job.id.clone(),
            path: env.output_dir.join("Spyder-6.0.0-Linux-x86_64.sh"),
            version: "6.0.0".to_string(),
            platform: Platform::Linux,
            signature: None,
        };
        (artifact, job, env)
    }

    #[tokio::test]
    async fn matching_version_passes() {
        let work = tempfile::tempdir().expect("tempdir");
        let (artifact, job, env) = fixture(work.path()).await;
        InstallerVerifier::new(Arc::new(FixedVersion("6.0.0")))
            .verify(&artifact, &job, &env, &CancellationToken::new())
            .await
            .expect("verified");
    }

    #[tokio::test]
    async fn mismatch_reports_both_versions() {
        let work = tempfile::tempdir().expect("tempdir");
        let (artifact, job, env) = fixture(work.path()).await;
        let err = InstallerVerifier::new(Arc::new(FixedVersion("6.0.1")))
            .verify(&artifact, &job, &env, &CancellationToken::new())
            .await
            .expect_err("mismatch");
        match err {
            PipelineError::Verify(VerifyError::Mismatch { expected, actual }) => {
                assert_eq!(expected, "6.0.0");
                assert_eq!(actual, "6.0.1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn comparison_is_exact() {
        assert!(check_version("6.0.0", "6.0.0").is_ok());
        assert!(check_version("6.0.0", "6.0.0 ").is_err());
        assert!(check_version("6.0.0", "v6.0.0").is_err());
        assert!(check_version("6.0.0", "6.0").is_err());
    }

    #[test]
    fn only_trailing_line_terminators_are_stripped() {
        assert_eq!(decode_version_output("6.0.0\r\n"), "6.0.0");
        assert_eq!(decode_version_output("6.0.0\n"), "6.0.0");
        assert_eq!(decode_version_output(" 6.0.0\n"), " 6.0.0");
    }

    #[test]
    fn default_install_and_version_commands_share_the_prefix() {
        let runner = CommandInstallerRunner::new(CommandsConfig::default(), Duration::from_secs(10));
        let prefix = Path::new("/work/job/install");
        let values = Placeholders::new()
            .with_path("artifact", Path::new("/work/job/dist/Spyder.pkg"))
            .with_path("prefix", prefix);

        for platform in Platform::ALL {
            let target = TargetDescriptor::new(platform);
            let install = runner.install_template(&target).render(&values);
            let probe = runner.version_template(&target).render(&values);
            let mentions_prefix = |program: &str, args: &[String]| {
                std::iter::once(program)
                    .chain(args.iter().map(String::as_str))
                    .any(|part| part.contains("/work/job/install"))
            };
            assert!(mentions_prefix(&install.program, &install.args), "{platform:?} install");
            assert!(mentions_prefix(&probe.program, &probe.args), "{platform:?} version");
        }

        let macos = TargetDescriptor::new(Platform::MacosArm64);
        assert_eq!(
            runner.version_template(&macos),
            &CommandsConfig::default().version_macos
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_runner_reads_version_from_probe() {
        let prefix = tempfile::tempdir().expect("tempdir");
        let commands = CommandsConfig {
            version_unix: CommandTemplate::new("sh", ["-c", "echo 6.0.0"]),
            install_linux: CommandTemplate::new("sh", ["-c", "exit 3"]),
            ..CommandsConfig::default()
        };
        let runner = CommandInstallerRunner::new(commands, Duration::from_secs(10));
        let target = TargetDescriptor::new(Platform::Linux);

        let version = runner
            .installed_version(&target, prefix.path())
            .await
            .expect("version");
        assert_eq!(version, "6.0.0");

        let err = runner
            .install(Path::new("Spyder.sh"), &target, prefix.path())
            .await
            .expect_err("install fails");
        assert!(matches!(err, PipelineError::Verify(VerifyError::InstallFailed { .. })));
    }
}
