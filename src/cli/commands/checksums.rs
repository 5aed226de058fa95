//! Checksums command implementation.

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{CliError, PipelineError, Result};
use crate::publish::ChecksumManifest;

/// Execute checksums command
pub(super) async fn execute_checksums(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Checksums { files, output } = &args.command else {
        return Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: "Invalid command for checksums execution".to_string(),
        }));
    };

    let manifest = ChecksumManifest::compute(files).await?;
    if manifest.is_empty() {
        config.warning_println("No files to hash");
    }

    match output {
        Some(path) => {
            manifest.write(path).await?;
            config.success_println(&format!(
                "Wrote {} checksum(s) to {}",
                manifest.entries().len(),
                path.display()
            ));
        }
        None => print!("{}", manifest.render()),
    }
    Ok(0)
}
