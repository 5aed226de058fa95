//! Command execution.
//!
//! Every command returns its process exit code. Configuration errors raised
//! before any job is scheduled exit with [`EXIT_CONFIG_ERROR`]; any other
//! failure exits with 1.

mod cache_key;
mod checksums;
mod helpers;
mod plan;
mod run;
mod verify;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::config::EnvConfig;
use crate::error::{CliError, PipelineError, PublishError, Result};
use tokio_util::sync::CancellationToken;

/// Exit code for configuration errors
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code a command error maps to
pub fn exit_code_for(error: &PipelineError) -> i32 {
    match error {
        PipelineError::Config(_)
        | PipelineError::Cli(CliError::InvalidArguments { .. })
        | PipelineError::Publish(PublishError::MissingToken) => EXIT_CONFIG_ERROR,
        _ => 1,
    }
}

/// Execute the parsed command
pub async fn execute_command(args: Args, env: &EnvConfig, cancel: &CancellationToken) -> Result<i32> {
    let config = RuntimeConfig::from(&args);

    if let Err(reason) = args.validate() {
        config.error_println(&format!("Invalid arguments: {}", reason));
        return Ok(EXIT_CONFIG_ERROR);
    }

    let result = match &args.command {
        Command::Plan { .. } => plan::execute_plan(&args, &config).await,
        Command::Run { .. } => run::execute_run(&args, &config, env, cancel).await,
        Command::CacheKey { .. } => cache_key::execute_cache_key(&args, &config).await,
        Command::Checksums { .. } => checksums::execute_checksums(&args, &config).await,
        Command::Verify { .. } => verify::execute_verify(&args, &config, cancel).await,
    };

    match result {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => {
            config.error_println(&format!("Command '{}' failed: {}", args.command.name(), e));

            let suggestions = e.recovery_suggestions();
            if config.is_verbose() && !suggestions.is_empty() {
                config.println("\n💡 Recovery suggestions:");
                for suggestion in suggestions {
                    config.println(&format!("  • {}", suggestion));
                }
            }

            Ok(exit_code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, ConfigError};

    #[test]
    fn configuration_errors_exit_with_two() {
        let err = PipelineError::from(ConfigError::MissingReleaseTag);
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for(&PublishError::MissingToken.into()), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn runtime_errors_exit_with_one() {
        let err = PipelineError::from(BuildError::MissingArtifact {
            path: "dist/App.pkg".into(),
        });
        assert_eq!(exit_code_for(&err), 1);
    }
}
