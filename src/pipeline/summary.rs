//! Run report and its JSON summary file.

use super::{JobOutcome, JobStatus};
use crate::matrix::BuildMatrix;
use crate::publish::AggregationReport;
use crate::trigger::{EventKind, TriggerFlags};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the run summary inside the dist directory
pub const SUMMARY_FILE: &str = "run-summary.json";

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every resolved job succeeded (vacuously true for an empty matrix)
    Succeeded,
    /// At least one job, or publication, failed
    Failed,
    /// The run was cancelled
    Cancelled,
}

/// Everything a run did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Triggering event kind
    pub event: EventKind,
    /// Flags derived from the event
    pub flags: TriggerFlags,
    /// Resolved matrix
    pub matrix: BuildMatrix,
    /// Release tag, in release mode
    pub release_tag: Option<String>,
    /// One outcome per resolved job, in matrix order
    pub jobs: Vec<JobOutcome>,
    /// Aggregation results
    pub aggregation: AggregationReport,
    /// Aggregation or publication failure, if any
    pub aggregation_error: Option<String>,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Overall status
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.jobs.iter().all(|j| j.status == JobStatus::Succeeded)
            && self.aggregation_error.is_none()
            && self.aggregation.uploads_ok()
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }

    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Succeeded
    }

    /// Process exit code: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Number of jobs in `status`
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Write the report as JSON to `path`, atomically
    pub async fn write_summary(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Summary<'a> {
            status: RunStatus,
            #[serde(flatten)]
            report: &'a RunReport,
        }

        let json = serde_json::to_vec_pretty(&Summary {
            status: self.status(),
            report: self,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&temp, &json).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        log::debug!("Wrote run summary {}", path.display());
        Ok(())
    }
}
