//! Cache-key command implementation.

use super::helpers::load_config;
use crate::cache::{SubcomponentCacheKey, SubcomponentRegistry};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{CliError, ConfigError, PipelineError, Result};

/// Execute cache-key command
pub(super) async fn execute_cache_key(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::CacheKey { component, arch } = &args.command else {
        return Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: "Invalid command for cache-key execution".to_string(),
        }));
    };

    let pipeline_config = load_config(args)?;
    let registry = SubcomponentRegistry::from_config(&pipeline_config.subcomponents);
    let subcomponent = registry.get(component).ok_or_else(|| ConfigError::InvalidValue {
        field: "component".to_string(),
        reason: format!(
            "'{}' is not a registered subcomponent (known: {})",
            component,
            registry
                .components()
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })?;

    let key = SubcomponentCacheKey::derive(
        subcomponent,
        arch,
        &pipeline_config.runtime_version,
        &args.repo,
    )
    .await?;

    config.verbose_println(&format!("marker: {}", subcomponent.marker.display()));
    println!("{}", key);
    Ok(0)
}
