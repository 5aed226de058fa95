//! Job terminal states.

use crate::build::Artifact;
use crate::error::PipelineError;
use crate::matrix::BuildJob;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal state of a [`BuildJob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Built, signed (if required) and verified
    Succeeded,
    /// A stage of this job failed
    Failed,
    /// Never ran to completion because something it depends on failed
    SkippedUpstreamFailure,
    /// Interrupted by run cancellation
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::SkippedUpstreamFailure => "skipped (upstream failure)",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStage {
    /// Source checkout and subcomponent production for the branch
    Upstream,
    /// Environment provisioning
    Provision,
    /// Cache restoration
    CacheRestore,
    /// Installer build
    Build,
    /// Signing and notarization
    Sign,
    /// Installer verification
    Verify,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStage::Upstream => "upstream",
            JobStage::Provision => "provision",
            JobStage::CacheRestore => "cache-restore",
            JobStage::Build => "build",
            JobStage::Sign => "sign",
            JobStage::Verify => "verify",
        };
        f.write_str(label)
    }
}

/// Error recorded on a job that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Stage that failed
    pub stage: JobStage,
    /// Error classification, see [`PipelineError::kind`]
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl JobError {
    /// Record `error` raised at `stage`
    pub fn new(stage: JobStage, error: &PipelineError) -> Self {
        Self {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Final record of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The job
    pub job: BuildJob,
    /// Terminal state
    pub status: JobStatus,
    /// Artifact, present only on success
    pub artifact: Option<Artifact>,
    /// Error, present unless the job succeeded
    pub error: Option<JobError>,
    /// Wall time in seconds
    pub duration_secs: f64,
}

impl JobOutcome {
    /// Successful job
    pub fn succeeded(job: BuildJob, artifact: Artifact, elapsed: Duration) -> Self {
        Self {
            job,
            status: JobStatus::Succeeded,
            artifact: Some(artifact),
            error: None,
            duration_secs: elapsed.as_secs_f64(),
        }
    }

    /// Job ended at `stage` with `status`
    pub fn ended(
        job: BuildJob,
        status: JobStatus,
        stage: JobStage,
        error: &PipelineError,
        elapsed: Duration,
    ) -> Self {
        Self {
            job,
            status,
            artifact: None,
            error: Some(JobError::new(stage, error)),
            duration_secs: elapsed.as_secs_f64(),
        }
    }

    /// Job skipped because its upstream stage failed
    pub fn skipped(job: BuildJob, stage: JobStage, reason: &PipelineError) -> Self {
        Self::ended(
            job,
            JobStatus::SkippedUpstreamFailure,
            stage,
            reason,
            Duration::ZERO,
        )
    }
}
