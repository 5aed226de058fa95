//! Verify command implementation.
//!
//! Installs one installer into a clean prefix and checks the installed
//! version against the expected string.

use super::helpers::load_config;
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{CliError, PipelineError, Result};
use crate::matrix::{Platform, target_for};
use crate::verify::{CommandInstallerRunner, InstallerRunner, check_version};
use tokio_util::sync::CancellationToken;

/// Execute verify command
pub(super) async fn execute_verify(
    args: &Args,
    config: &RuntimeConfig,
    cancel: &CancellationToken,
) -> Result<i32> {
    let Command::Verify {
        installer,
        platform,
        expected_version,
        prefix,
    } = &args.command
    else {
        return Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: "Invalid command for verify execution".to_string(),
        }));
    };

    let platform = Platform::from_id(platform).ok_or_else(|| CliError::InvalidArguments {
        reason: format!("unknown platform '{}'", platform),
    })?;
    let pipeline_config = load_config(args)?;
    let target = target_for(platform, &pipeline_config);
    let prefix = prefix
        .clone()
        .unwrap_or_else(|| pipeline_config.work_dir.join("verify").join(platform.id()));

    if tokio::fs::try_exists(&prefix).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&prefix).await?;
    }

    let runner = CommandInstallerRunner::new(
        pipeline_config.commands.clone(),
        pipeline_config.install_timeout(),
    );

    config.verbose_println(&format!(
        "Installing {} into {}",
        installer.display(),
        prefix.display()
    ));
    let actual = tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        actual = async {
            runner.install(installer, &target, &prefix).await?;
            runner.installed_version(&target, &prefix).await
        } => actual?,
    };

    check_version(expected_version, &actual)?;
    config.success_println(&format!("Installed version {} verified", actual));
    Ok(0)
}
