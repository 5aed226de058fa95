//! Plan command implementation.
//!
//! Classifies the trigger, resolves the matrix and prints what a run would
//! do without touching any collaborator.

use super::helpers::load_config;
use crate::cache::{SubcomponentCacheKey, SubcomponentRegistry};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{CliError, PipelineError, Result};
use crate::pipeline;

/// Execute plan command
pub(super) async fn execute_plan(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Plan {
        trigger,
        skip_subcomponent_build,
    } = &args.command
    else {
        return Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: "Invalid command for plan execution".to_string(),
        }));
    };

    let pipeline_config = load_config(args)?;
    let event = trigger.to_event(None);
    let plan = pipeline::plan(&event, &pipeline_config, *skip_subcomponent_build)?;
    let flags = plan.flags;

    config.section(&format!("Trigger: {}", event.kind));
    config.indent(&format!("release:                  {}", flags.release));
    config.indent(&format!("pre_release:              {}", flags.pre_release));
    config.indent(&format!("debug_access:             {}", flags.debug_access));
    config.indent(&format!("use_cached_subcomponents: {}", flags.use_cached_subcomponents));
    config.indent(&format!("notarize:                 {}", flags.notarize));

    config.section("Matrix");
    if plan.jobs.is_empty() {
        config.println("No targets enabled; a run would be a no-op");
    }
    for target in &plan.matrix.targets {
        config.indent(&format!(
            "{:<14} runner={} arch={}",
            target.platform_id(),
            target.runner_class,
            target.arch_tag
        ));
    }
    for branch in plan.matrix.branches.branches() {
        config.indent(&format!("branch: {}", branch));
    }

    if flags.use_cached_subcomponents && !plan.jobs.is_empty() {
        config.section("Cache keys");
        let registry = SubcomponentRegistry::from_config(&pipeline_config.subcomponents);
        for arch_tag in plan.matrix.arch_tags() {
            for component in registry.components() {
                match SubcomponentCacheKey::derive(
                    component,
                    arch_tag,
                    &pipeline_config.runtime_version,
                    &args.repo,
                )
                .await
                {
                    Ok(key) => config.indent(&key.to_string()),
                    Err(e) => config.warning_println(&format!(
                        "{} ({}): key unavailable: {}",
                        component.name, arch_tag, e
                    )),
                }
            }
        }
    }

    config.section("Stages");
    for (position, stage) in plan.graph.order()?.into_iter().enumerate() {
        config.indent(&format!("{:>3}. {}", position + 1, stage));
    }

    Ok(0)
}
