//! Run orchestration: classify, resolve, fan out, join, aggregate.

use super::graph::StageGraph;
use super::job::{JobOutcome, JobStage, JobStatus};
use super::summary::{RunReport, SUMMARY_FILE};
use crate::build::{
    EnvironmentProvisioner, InstallerBuilder, PlatformBuildExecutor,
};
use crate::cache::{CacheCoordinator, CacheStore, SubcomponentProducer, SubcomponentRegistry};
use crate::config::{CacheMissPolicy, PipelineConfig, RetryConfig};
use crate::error::{ConfigError, PipelineError, Result};
use crate::matrix::{Branch, BuildJob, BuildMatrix, resolve};
use crate::publish::{AggregationReport, ArtifactAggregator, ReleasePublisher, ReleaseRecord};
use crate::sign::{SigningCoordinator, SigningCredentials};
use crate::source::SourceProvider;
use crate::trigger::{TriggerEvent, TriggerFlags, classify};
use crate::verify::{InstallerRunner, InstallerVerifier};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// External collaborators of a run
#[derive(Clone)]
pub struct Collaborators {
    /// Branch checkouts
    pub sources: Arc<dyn SourceProvider>,
    /// Package and installer builder
    pub builder: Arc<dyn InstallerBuilder>,
    /// Subcomponent cache
    pub cache_store: Arc<dyn CacheStore>,
    /// Signing and notarization
    pub signing: SigningCoordinator,
    /// Installer execution for verification
    pub installer_runner: Arc<dyn InstallerRunner>,
    /// Release publication, required in release mode
    pub publisher: Option<Arc<dyn ReleasePublisher>>,
}

/// Run-level switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip the run-global subcomponent production stage
    pub skip_subcomponent_build: bool,
    /// What a strict-mode cache miss does to the rest of the run
    pub cache_miss_policy: CacheMissPolicy,
}

/// Flags, matrix, jobs and stage graph of a run, before anything executes
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Derived flags
    pub flags: TriggerFlags,
    /// Resolved matrix
    pub matrix: BuildMatrix,
    /// Jobs in matrix order
    pub jobs: Vec<BuildJob>,
    /// Stage graph
    pub graph: StageGraph,
}

impl RunPlan {
    /// Jobs and validated stage graph for an already resolved matrix
    pub fn from_matrix(flags: TriggerFlags, matrix: BuildMatrix, produce_subcomponents: bool) -> Result<Self> {
        let jobs = matrix.jobs(flags);
        let graph = StageGraph::build(&jobs, produce_subcomponents);
        graph.order()?;
        Ok(Self {
            flags,
            matrix,
            jobs,
            graph,
        })
    }
}

/// Everything one job needs, shared by all job tasks
struct JobContext {
    executor: PlatformBuildExecutor,
    cache: CacheCoordinator,
    signing: SigningCoordinator,
    verifier: InstallerVerifier,
    cache_miss_policy: CacheMissPolicy,
}

/// Drives a whole run
pub struct PipelineRunner {
    config: PipelineConfig,
    retry: RetryConfig,
    credentials: SigningCredentials,
    collaborators: Collaborators,
    options: RunOptions,
}

impl PipelineRunner {
    /// Runner with default options
    pub fn new(
        config: PipelineConfig,
        retry: RetryConfig,
        credentials: SigningCredentials,
        collaborators: Collaborators,
    ) -> Self {
        let options = RunOptions {
            cache_miss_policy: config.cache_miss_policy,
            ..RunOptions::default()
        };
        Self {
            config,
            retry,
            credentials,
            collaborators,
            options,
        }
    }

    /// Override run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Classify, resolve and build the stage graph without executing anything
    pub fn plan(&self, event: &TriggerEvent) -> Result<RunPlan> {
        plan(event, &self.config, self.options.skip_subcomponent_build)
    }

    /// Execute the run.
    ///
    /// Returns `Err` only for run-level configuration errors raised before any
    /// job is scheduled. Job failures are recorded in the [`RunReport`].
    pub async fn run(&self, event: &TriggerEvent, cancel: &CancellationToken) -> Result<RunReport> {
        let plan = self.plan(event)?;
        self.run_plan(event, plan, cancel).await
    }

    /// Execute a plan computed earlier for `event`, see [`PipelineRunner::run`]
    pub async fn run_plan(
        &self,
        event: &TriggerEvent,
        plan: RunPlan,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        self.preflight(event, &plan)?;

        log::info!(
            "{} run: {} job(s) across {} branch(es)",
            event.kind,
            plan.jobs.len(),
            plan.matrix.branches.branches().len()
        );

        let outcomes = if plan.jobs.is_empty() {
            log::info!("Empty build matrix; nothing to do");
            Vec::new()
        } else {
            self.execute_jobs(&plan, cancel).await
        };

        let release = event.release_tag.clone().map(|tag| ReleaseRecord { tag });
        let aggregator = ArtifactAggregator::new(
            &self.config.dist_dir,
            self.config.checksum_file_name(),
            self.collaborators.publisher.clone(),
        );
        let (aggregation, aggregation_error) = match aggregator
            .aggregate(&outcomes, &plan.flags, release.as_ref(), cancel)
            .await
        {
            Ok(report) => (report, None),
            Err(e) => {
                log::error!("Aggregation failed: {}", e);
                (AggregationReport::default(), Some(e.to_string()))
            }
        };

        let report = RunReport {
            event: event.kind,
            flags: plan.flags,
            matrix: plan.matrix,
            release_tag: event.release_tag.clone(),
            jobs: outcomes,
            aggregation,
            aggregation_error,
            cancelled: cancel.is_cancelled(),
            started_at,
            finished_at: Utc::now(),
        };

        let summary_path = self.config.dist_dir.join(SUMMARY_FILE);
        if let Err(e) = report.write_summary(&summary_path).await {
            log::warn!("Could not write run summary {}: {}", summary_path.display(), e);
        }

        Ok(report)
    }

    /// Run-level checks. Any failure here is fatal and happens before scheduling.
    fn preflight(&self, event: &TriggerEvent, plan: &RunPlan) -> Result<()> {
        self.credentials
            .ensure_available(&plan.flags, &plan.matrix.targets)?;

        if plan.flags.release {
            if event.release_tag.as_deref().is_none_or(|t| t.trim().is_empty()) {
                return Err(ConfigError::MissingReleaseTag.into());
            }
            if self.collaborators.publisher.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "github_repo".to_string(),
                    reason: "release runs need a release repository".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn job_context(&self) -> Arc<JobContext> {
        let registry = SubcomponentRegistry::from_config(&self.config.subcomponents);
        let provisioner = EnvironmentProvisioner::new(
            &self.config.work_dir,
            &self.config.runtime_version,
            self.config.commands.provision.clone(),
        );
        Arc::new(JobContext {
            executor: PlatformBuildExecutor::new(
                provisioner,
                Arc::clone(&self.collaborators.builder),
                registry,
            ),
            cache: self.cache_coordinator(),
            signing: self.collaborators.signing.clone(),
            verifier: InstallerVerifier::new(Arc::clone(&self.collaborators.installer_runner)),
            cache_miss_policy: self.options.cache_miss_policy,
        })
    }

    fn cache_coordinator(&self) -> CacheCoordinator {
        CacheCoordinator::new(
            SubcomponentRegistry::from_config(&self.config.subcomponents),
            Arc::clone(&self.collaborators.cache_store),
            &self.config.runtime_version,
            self.retry.cache_policy(),
        )
    }

    /// Fan out every job and wait for all of them (the join barrier)
    async fn execute_jobs(&self, plan: &RunPlan, cancel: &CancellationToken) -> Vec<JobOutcome> {
        let context = self.job_context();
        let abort = cancel.child_token();
        let producer = SubcomponentProducer::new(
            self.cache_coordinator(),
            Arc::clone(&self.collaborators.builder),
            self.config.work_dir.join("subcomponents"),
        );

        let mut tasks: JoinSet<JobOutcome> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, BuildJob> = HashMap::new();
        let mut outcomes: Vec<JobOutcome> = Vec::with_capacity(plan.jobs.len());

        for branch in plan.matrix.branches.branches() {
            let branch_jobs: Vec<&BuildJob> =
                plan.jobs.iter().filter(|j| &j.branch == branch).collect();

            match self.prepare_branch(branch, &branch_jobs, plan, &producer, &abort).await {
                Ok(source_root) => {
                    for job in branch_jobs {
                        let handle = tasks.spawn(run_job(
                            Arc::clone(&context),
                            job.clone(),
                            source_root.clone(),
                            abort.clone(),
                            cancel.clone(),
                        ));
                        running.insert(handle.id(), job.clone());
                    }
                }
                Err(e) => {
                    log::error!("Upstream stage for branch {} failed: {}", branch, e);
                    for job in branch_jobs {
                        outcomes.push(if matches!(e, PipelineError::Cancelled) && cancel.is_cancelled() {
                            JobOutcome::ended(
                                job.clone(),
                                JobStatus::Cancelled,
                                JobStage::Upstream,
                                &e,
                                std::time::Duration::ZERO,
                            )
                        } else {
                            JobOutcome::skipped(job.clone(), JobStage::Upstream, &e)
                        });
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    running.remove(&id);
                    log::info!("[{}] {}", outcome.job.id, outcome.status);
                    outcomes.push(outcome);
                }
                Err(join_error) => {
                    let Some(job) = running.remove(&join_error.id()) else {
                        continue;
                    };
                    let error = PipelineError::Other(anyhow::anyhow!("job task aborted: {}", join_error));
                    log::error!("[{}] {}", job.id, error);
                    outcomes.push(JobOutcome::ended(
                        job,
                        JobStatus::Failed,
                        JobStage::Build,
                        &error,
                        std::time::Duration::ZERO,
                    ));
                }
            }
        }

        let order: HashMap<&str, usize> = plan
            .jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id.as_str(), i))
            .collect();
        outcomes.sort_by_key(|o| order.get(o.job.id.as_str()).copied().unwrap_or(usize::MAX));
        outcomes
    }

    /// Check out the branch and, when its jobs restore from the cache, run
    /// the subcomponent production stage. Completes before any job of the
    /// branch is spawned.
    ///
    /// `abort` is the run token's child that an abort-run cache miss cancels,
    /// so a miss in one branch also stops production for the others.
    async fn prepare_branch(
        &self,
        branch: &Branch,
        jobs: &[&BuildJob],
        plan: &RunPlan,
        producer: &SubcomponentProducer,
        abort: &CancellationToken,
    ) -> Result<PathBuf> {
        if abort.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let source_root = tokio::select! {
            _ = abort.cancelled() => return Err(PipelineError::Cancelled),
            checkout = self.collaborators.sources.checkout(branch) => checkout?,
        };

        let uses_cache = jobs.iter().any(|j| j.flags.use_cached_subcomponents);
        if !uses_cache {
            return Ok(source_root);
        }
        if self.options.skip_subcomponent_build {
            log::info!("Subcomponent production skipped for branch {}", branch);
            return Ok(source_root);
        }

        let arch_tags = plan.matrix.arch_tags();
        producer.produce(&arch_tags, &source_root, abort).await?;
        Ok(source_root)
    }
}

/// Classify the event, resolve the matrix and validate the stage graph
pub fn plan(event: &TriggerEvent, config: &PipelineConfig, skip_production: bool) -> Result<RunPlan> {
    let flags = classify(event);
    let matrix = resolve(event.kind, &event.overrides.platforms, config);
    RunPlan::from_matrix(flags, matrix, !skip_production)
}

/// One job: provision → restore → build → sign → verify, strictly in order
async fn run_job(
    ctx: Arc<JobContext>,
    job: BuildJob,
    source_root: PathBuf,
    abort: CancellationToken,
    run_cancel: CancellationToken,
) -> JobOutcome {
    let started = Instant::now();

    let ended = |job: BuildJob, stage: JobStage, error: PipelineError| {
        let status = match &error {
            PipelineError::Cancelled if run_cancel.is_cancelled() => JobStatus::Cancelled,
            PipelineError::Cancelled => JobStatus::SkippedUpstreamFailure,
            _ => JobStatus::Failed,
        };
        if status == JobStatus::Failed {
            log::error!("[{}] {} failed: {}", job.id, stage, error);
        }
        JobOutcome::ended(job, status, stage, &error, started.elapsed())
    };

    if abort.is_cancelled() {
        return ended(job, JobStage::Provision, PipelineError::Cancelled);
    }

    let env = match ctx.executor.provision(&job, &source_root).await {
        Ok(env) => env,
        Err(e) => return ended(job, JobStage::Provision, e),
    };

    let restoration = match ctx
        .cache
        .restore_for_job(&job, &source_root, &env.channel_dir, &abort)
        .await
    {
        Ok(restoration) => restoration,
        Err(e) => {
            if e.is_cache_miss() && ctx.cache_miss_policy == CacheMissPolicy::AbortRun {
                log::error!("[{}] Cache miss under abort-run policy; skipping remaining jobs", job.id);
                abort.cancel();
            }
            return ended(job, JobStage::CacheRestore, e);
        }
    };

    let built = tokio::select! {
        _ = abort.cancelled() => Err(PipelineError::Cancelled),
        built = ctx.executor.build(&job, &env, &restoration, &source_root) => built,
    };
    let artifact = match built {
        Ok(artifact) => artifact,
        Err(e) => return ended(job, JobStage::Build, e),
    };

    let artifact = match ctx.signing.process(artifact, &job, &env, &abort).await {
        Ok(artifact) => artifact,
        Err(e) => return ended(job, JobStage::Sign, e),
    };

    if let Err(e) = ctx.verifier.verify(&artifact, &job, &env, &abort).await {
        return ended(job, JobStage::Verify, e);
    }

    JobOutcome::succeeded(job, artifact, started.elapsed())
}
