//! Pipeline orchestration.
//!
//! A run classifies its trigger, resolves the build matrix, runs the
//! per-branch subcomponent production stage, fans out one isolated job per
//! matrix cell, joins on all of them and aggregates whatever succeeded.

mod graph;
mod job;
mod runner;
mod summary;

pub use graph::{Stage, StageGraph};
pub use job::{JobError, JobOutcome, JobStage, JobStatus};
pub use runner::{Collaborators, PipelineRunner, RunOptions, RunPlan, plan};
pub use summary::{RunReport, RunStatus, SUMMARY_FILE};
