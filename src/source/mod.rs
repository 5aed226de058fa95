//! Source checkouts per branch.
//!
//! The triggering checkout is used in place. Named branches (scheduled runs)
//! are shallow-cloned from the checkout's `origin` remote into the work
//! directory so every branch builds from its own tree.

use crate::error::{CliError, PipelineError, Result};
use crate::matrix::Branch;
use crate::process::{Invocation, run_command};
use async_trait::async_trait;
use gix::remote::fetch::Shallow;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

/// Provides a source tree for a branch
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Path of a checkout of `branch`
    async fn checkout(&self, branch: &Branch) -> Result<PathBuf>;
}

/// [`SourceProvider`] for a git checkout; named branches are cloned with gix
#[derive(Debug, Clone)]
pub struct GitCheckouts {
    repo_root: PathBuf,
    checkouts_dir: PathBuf,
}

impl GitCheckouts {
    /// Checkouts of the repository at `repo_root`, cloned under `work_dir/checkouts`
    pub fn new(repo_root: impl Into<PathBuf>, work_dir: &Path) -> Self {
        Self {
            repo_root: repo_root.into(),
            checkouts_dir: work_dir.join("checkouts"),
        }
    }

    /// URL of the triggering checkout's `origin` remote
    pub async fn origin_url(&self) -> Result<String> {
        let invocation = Invocation::new(git_binary()?, ["remote", "get-url", "origin"])
            .current_dir(&self.repo_root);
        let output = run_command(&invocation).await?;
        if !output.success() {
            return Err(PipelineError::Cli(CliError::ExecutionFailed {
                command: "git remote get-url origin".to_string(),
                reason: format!(
                    "No origin remote found. Please configure an 'origin' remote. ({})",
                    output.failure_reason()
                ),
            }));
        }
        Ok(output.stdout.trim().to_string())
    }
}

fn git_binary() -> Result<String> {
    let git = which::which("git").map_err(|e| {
        PipelineError::Cli(CliError::ExecutionFailed {
            command: "git".to_string(),
            reason: format!("git not found in PATH: {}", e),
        })
    })?;
    Ok(git.to_string_lossy().to_string())
}

#[async_trait]
impl SourceProvider for GitCheckouts {
    async fn checkout(&self, branch: &Branch) -> Result<PathBuf> {
        let name = match branch {
            Branch::Current => return Ok(self.repo_root.clone()),
            Branch::Named(name) => name,
        };

        let remote_url = self.origin_url().await?;
        let target = self.checkouts_dir.join(name.replace(['/', '\\'], "_"));
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::create_dir_all(&self.checkouts_dir).await?;

        log::info!("Cloning branch {} into {}", name, target.display());
        let branch_name = name.clone();
        let destination = target.clone();
        tokio::task::spawn_blocking(move || shallow_clone(&remote_url, &branch_name, &destination))
            .await
            .map_err(|e| clone_failed(name, e.to_string()))??;

        Ok(target)
    }
}

/// Depth-1 clone of `branch` only, with its worktree checked out into `dest`
fn shallow_clone(url: &str, branch: &str, dest: &Path) -> Result<()> {
    let should_interrupt = AtomicBool::new(false);
    let mut prepare = gix::prepare_clone(url, dest)
        .map_err(|e| clone_failed(branch, e.to_string()))?
        .with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN))
        .with_ref_name(Some(branch))
        .map_err(|e| clone_failed(branch, e.to_string()))?;

    let (mut checkout, _) = prepare
        .fetch_then_checkout(gix::progress::Discard, &should_interrupt)
        .map_err(|e| clone_failed(branch, e.to_string()))?;
    checkout
        .main_worktree(gix::progress::Discard, &should_interrupt)
        .map_err(|e| clone_failed(branch, e.to_string()))?;
    Ok(())
}

fn clone_failed(branch: &str, reason: String) -> PipelineError {
    PipelineError::Cli(CliError::ExecutionFailed {
        command: format!("clone branch {}", branch),
        reason: format!("Failed to clone repository: {}", reason),
    })
}
