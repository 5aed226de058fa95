//! # KODEGEN Bundler Pipeline
//!
//! Multi-platform installer pipeline: one trigger event in, signed and
//! verified installers (and optionally a published release) out.
//!
//! A run moves through explicit, typed stages:
//!
//! - **Classify**: the trigger event becomes a set of [`TriggerFlags`]
//! - **Resolve**: platform toggles become a [`BuildMatrix`] of targets and branches
//! - **Produce**: missing subcomponent packages are built once per branch and cached
//! - **Per job**: cache restore, build, sign/notarize, verify; each job isolated
//! - **Join**: every job reaches a terminal state before aggregation starts
//! - **Aggregate**: succeeded artifacts, checksums, release uploads, run summary
//!
//! ## Usage
//!
//! ```bash
//! kodegen_bundler_pipeline plan --event pull-request
//! kodegen_bundler_pipeline run --event scheduled --windows false
//! kodegen_bundler_pipeline run --event release-created --release-tag v6.1.0
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod matrix;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod retry;
pub mod sign;
pub mod source;
pub mod trigger;
pub mod verify;

pub use cli::Args;
pub use config::{CacheMissPolicy, EnvConfig, PipelineConfig, RetryConfig};
pub use error::{PipelineError, Result};
pub use matrix::{BuildJob, BuildMatrix, Platform, TargetDescriptor, resolve};
pub use pipeline::{Collaborators, JobOutcome, JobStatus, PipelineRunner, RunOptions, RunReport};
pub use trigger::{EventKind, TriggerEvent, TriggerFlags, classify};
