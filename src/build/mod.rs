//! Platform build execution.
//!
//! A job first gets an isolated [`BuildEnvironment`], then the
//! [`PlatformBuildExecutor`] rebuilds the top-level package (outside release
//! mode), builds subcomponents from source when the cache is bypassed, and
//! invokes the [`InstallerBuilder`]. The builder's version string and artifact
//! path come back as a typed [`Artifact`].

mod builder;
mod environment;
mod executor;

pub use builder::{BuildOutput, BuilderReport, CommandBuilder, InstallerBuilder, SubcomponentBuildRequest};
pub use environment::{BuildEnvironment, EnvironmentProvisioner};
pub use executor::PlatformBuildExecutor;

use crate::matrix::{JobId, Platform};
use crate::sign::Signature;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An installer produced by one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Producing job
    pub job_id: JobId,
    /// Installer path
    pub path: PathBuf,
    /// Version string reported by the builder
    pub version: String,
    /// Target platform
    pub platform: Platform,
    /// Signature details, once signed
    pub signature: Option<Signature>,
}

impl Artifact {
    /// Installer file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
