//! Run command implementation.
//!
//! Wires the command-backed collaborators into a [`PipelineRunner`], executes
//! the run and prints the per-job results.

use super::helpers::{load_config, parse_github_url};
use crate::build::CommandBuilder;
use crate::cache::LocalCacheStore;
use crate::cli::{Args, Command, RuntimeConfig};
use crate::config::{EnvConfig, PipelineConfig, RetryConfig};
use crate::error::{CliError, PipelineError, Result};
use crate::pipeline::{Collaborators, JobStatus, PipelineRunner, RunOptions, RunReport, SUMMARY_FILE};
use crate::publish::{GitHubPublisher, ReleasePublisher, UploadStatus};
use crate::sign::{SigningCoordinator, SigningCredentials};
use crate::source::GitCheckouts;
use crate::trigger::classify;
use crate::verify::CommandInstallerRunner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Execute run command
pub(super) async fn execute_run(
    args: &Args,
    config: &RuntimeConfig,
    env: &EnvConfig,
    cancel: &CancellationToken,
) -> Result<i32> {
    let Command::Run {
        trigger,
        release_tag,
        skip_subcomponent_build,
        cache_miss_policy,
    } = &args.command
    else {
        return Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: "Invalid command for run execution".to_string(),
        }));
    };

    let pipeline_config = load_config(args)?;
    let event = trigger.to_event(release_tag.as_deref());
    let retry = RetryConfig::from_env(env);
    let credentials = SigningCredentials::from_env(env);
    let sources = GitCheckouts::new(&args.repo, &pipeline_config.work_dir);

    let publisher = if classify(&event).release {
        release_publisher(&pipeline_config, &sources, env, &retry).await?
    } else {
        None
    };

    let collaborators = Collaborators {
        sources: Arc::new(sources),
        builder: Arc::new(CommandBuilder::new(
            &pipeline_config.product_name,
            &pipeline_config.commands,
        )),
        cache_store: Arc::new(LocalCacheStore::new(pipeline_config.resolved_cache_dir())),
        signing: SigningCoordinator::from_credentials(
            &credentials,
            &pipeline_config.timestamp_url,
            retry.notarization_policy(),
        ),
        installer_runner: Arc::new(CommandInstallerRunner::new(
            pipeline_config.commands.clone(),
            pipeline_config.install_timeout(),
        )),
        publisher,
    };

    let options = RunOptions {
        skip_subcomponent_build: *skip_subcomponent_build,
        cache_miss_policy: cache_miss_policy.unwrap_or(pipeline_config.cache_miss_policy),
    };
    let dist_dir = pipeline_config.dist_dir.clone();
    let runner = PipelineRunner::new(pipeline_config, retry, credentials, collaborators)
        .with_options(options);

    let _ = config.output().info(&format!("Starting {} run", event.kind));
    let report = runner.run(&event, cancel).await?;

    print_report(config, &report);
    config.verbose_println(&format!("Summary written to {}", dist_dir.join(SUMMARY_FILE).display()));
    Ok(report.exit_code())
}

/// Publisher for release runs. The repository comes from the configuration
/// or, failing that, from the checkout's `origin` remote.
async fn release_publisher(
    pipeline_config: &PipelineConfig,
    sources: &GitCheckouts,
    env: &EnvConfig,
    retry: &RetryConfig,
) -> Result<Option<Arc<dyn ReleasePublisher>>> {
    let repository = match &pipeline_config.github_repo {
        Some(repo) => Some(repo.clone()),
        None => match sources.origin_url().await {
            Ok(url) => parse_github_url(&url).ok(),
            Err(e) => {
                log::warn!("Could not determine release repository: {}", e);
                None
            }
        },
    };

    match repository {
        Some(repo) => {
            let publisher: Arc<dyn ReleasePublisher> =
                Arc::new(GitHubPublisher::new(&repo, env, retry.upload_policy())?);
            Ok(Some(publisher))
        }
        None => Ok(None),
    }
}

fn print_report(config: &RuntimeConfig, report: &RunReport) {
    config.section("Jobs");
    if report.jobs.is_empty() {
        config.println("No jobs resolved");
    }
    for outcome in &report.jobs {
        let detail = match (&outcome.artifact, &outcome.error) {
            (Some(artifact), _) => format!("{} ({})", artifact.file_name(), artifact.version),
            (None, Some(error)) => format!("[{}] {}", error.stage, error.message),
            (None, None) => String::new(),
        };
        let _ = config
            .output()
            .job_status(outcome.job.id.as_str(), outcome.status, &detail);
    }

    let aggregation = &report.aggregation;
    if !aggregation.artifacts.is_empty() || aggregation.manifest.is_some() {
        config.section("Artifacts");
        for artifact in &aggregation.artifacts {
            config.indent(&format!(
                "{:<14} {}",
                artifact.job_id.as_str(),
                artifact.path.display()
            ));
        }
        if let Some(manifest) = &aggregation.manifest {
            config.indent(&format!("checksums: {}", manifest.display()));
        }
    }

    if !aggregation.uploads.is_empty() {
        config.section("Release uploads");
        for upload in &aggregation.uploads {
            match &upload.status {
                UploadStatus::Uploaded => config.success_println(&upload.name),
                UploadStatus::AlreadyPresent => {
                    config.indent(&format!("{} (already present)", upload.name))
                }
                UploadStatus::Failed { reason } => {
                    config.error_println(&format!("{}: {}", upload.name, reason))
                }
            }
        }
    }
    if let Some(error) = &report.aggregation_error {
        config.error_println(&format!("Aggregation failed: {}", error));
    }

    let summary = format!(
        "{} succeeded, {} failed, {} skipped, {} cancelled",
        report.count(JobStatus::Succeeded),
        report.count(JobStatus::Failed),
        report.count(JobStatus::SkippedUpstreamFailure),
        report.count(JobStatus::Cancelled),
    );
    if report.is_success() {
        config.success_println(&format!("Run succeeded: {}", summary));
    } else {
        config.error_println(&format!("Run {:?}: {}", report.status(), summary));
    }
}
