//! Command line interface for the installer pipeline.

mod args;
pub mod commands;
mod output;

pub use args::{Args, Command, RuntimeConfig, TriggerArgs};
pub use commands::{EXIT_CONFIG_ERROR, execute_command, exit_code_for};
pub use output::OutputManager;

use crate::config::EnvConfig;
use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// Main CLI entry point
pub async fn run(env: EnvConfig, cancel: CancellationToken) -> Result<i32> {
    let args = Args::parse_args();
    execute_command(args, &env, &cancel).await
}
