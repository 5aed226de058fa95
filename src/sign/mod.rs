//! Code signing and notarization.
//!
//! Signing applies only when the run notarizes. Windows installers are signed
//! in place; macOS installers are signed from an ephemeral keychain, then
//! notarized and stapled. Linux installers pass through unchanged.

mod credentials;
mod macos;
mod notarize;
mod windows;

pub use credentials::{MacosCredentials, SigningCredentials, WindowsCredentials};
pub use macos::{ProductSigner, TempKeychain};
pub use notarize::{NotarizationVerdict, Notarizer, NotaryTool, parse_submission};
pub use windows::{AuthenticodeSigner, decode_certificate};

use crate::build::{Artifact, BuildEnvironment};
use crate::error::{ConfigError, PipelineError, Result, SignError};
use crate::matrix::{BuildJob, OsFamily};
use crate::retry::{RetryPolicy, retry_with_backoff};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Signing method applied to an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureMethod {
    /// Windows Authenticode
    Authenticode,
    /// macOS `productsign`
    ProductSign,
}

/// Signature details recorded on an [`Artifact`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// How the artifact was signed
    pub method: SignatureMethod,
    /// Whether a notarization ticket was stapled
    pub notarized: bool,
}

/// Signs an installer with platform credentials
#[async_trait]
pub trait ArtifactSigner: Send + Sync {
    /// Sign `artifact`, returning the signed artifact path
    async fn sign(&self, artifact: &Path, env: &BuildEnvironment) -> Result<PathBuf>;
}

/// Gates and sequences signing and notarization for one artifact
#[derive(Clone)]
pub struct SigningCoordinator {
    windows: Option<Arc<dyn ArtifactSigner>>,
    macos: Option<Arc<dyn ArtifactSigner>>,
    notarizer: Option<Arc<dyn Notarizer>>,
    notarization: RetryPolicy,
}

impl SigningCoordinator {
    /// Coordinator over explicit collaborators
    pub fn new(
        windows: Option<Arc<dyn ArtifactSigner>>,
        macos: Option<Arc<dyn ArtifactSigner>>,
        notarizer: Option<Arc<dyn Notarizer>>,
        notarization: RetryPolicy,
    ) -> Self {
        Self {
            windows,
            macos,
            notarizer,
            notarization,
        }
    }

    /// Coordinator using `signtool`, `productsign` and `notarytool`
    pub fn from_credentials(
        credentials: &SigningCredentials,
        timestamp_url: &str,
        notarization: RetryPolicy,
    ) -> Self {
        let windows = credentials.windows.clone().map(|c| {
            Arc::new(AuthenticodeSigner::new(c, timestamp_url)) as Arc<dyn ArtifactSigner>
        });
        let macos = credentials
            .macos
            .clone()
            .map(|c| Arc::new(ProductSigner::new(c)) as Arc<dyn ArtifactSigner>);
        let notarizer = credentials
            .macos
            .clone()
            .map(|c| Arc::new(NotaryTool::new(c)) as Arc<dyn Notarizer>);
        Self::new(windows, macos, notarizer, notarization)
    }

    /// Sign, and on macOS notarize, the artifact of `job`.
    ///
    /// A run that does not notarize, and every Linux artifact, passes through
    /// unsigned.
    pub async fn process(
        &self,
        mut artifact: Artifact,
        job: &BuildJob,
        env: &BuildEnvironment,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        if !job.flags.notarize {
            log::info!("[{}] Signing not required for this run", job.id);
            return Ok(artifact);
        }

        match job.target.platform.family() {
            OsFamily::Linux => {
                log::debug!("[{}] No signing defined for Linux", job.id);
                Ok(artifact)
            }
            OsFamily::Windows => {
                let signer = Self::require(&self.windows, job, "WINDOWS_CERT_BASE64")?;
                artifact.path = cancellable(signer.sign(&artifact.path, env), cancel).await?;
                artifact.signature = Some(Signature {
                    method: SignatureMethod::Authenticode,
                    notarized: false,
                });
                Ok(artifact)
            }
            OsFamily::Macos => {
                let signer = Self::require(&self.macos, job, "MACOS_CERTIFICATE")?;
                let notarizer = Self::require(&self.notarizer, job, "APPLE_ID")?;

                artifact.path = cancellable(signer.sign(&artifact.path, env), cancel).await?;
                self.notarize(notarizer.as_ref(), &artifact, job, cancel)
                    .await?;
                artifact.signature = Some(Signature {
                    method: SignatureMethod::ProductSign,
                    notarized: true,
                });
                Ok(artifact)
            }
        }
    }

    async fn notarize(
        &self,
        notarizer: &dyn Notarizer,
        artifact: &Artifact,
        job: &BuildJob,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let verdict = retry_with_backoff(
            || notarizer.submit(&artifact.path),
            &self.notarization,
            &format!("[{}] notarization", job.id),
            cancel,
        )
        .await?;

        match verdict {
            NotarizationVerdict::Accepted { submission_id } => {
                log::info!("[{}] Notarization accepted ({})", job.id, submission_id);
                cancellable(notarizer.staple(&artifact.path), cancel).await
            }
            NotarizationVerdict::Rejected {
                submission_id,
                status,
            } => Err(SignError::NotarizationRejected {
                artifact: artifact.file_name(),
                submission_id,
                status,
            }
            .into()),
        }
    }

    fn require<'a, T: ?Sized>(
        collaborator: &'a Option<Arc<T>>,
        job: &BuildJob,
        variable: &str,
    ) -> Result<&'a Arc<T>> {
        collaborator.as_ref().ok_or_else(|| {
            ConfigError::MissingCredential {
                platform: job.target.platform_id().to_string(),
                variable: variable.to_string(),
            }
            .into()
        })
    }
}

async fn cancellable<T>(
    operation: impl std::future::Future<Output = Result<T>>,
    cancel: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = operation => result,
    }
}
