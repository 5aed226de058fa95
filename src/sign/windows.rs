//! Windows Authenticode signing.

use super::ArtifactSigner;
use super::credentials::WindowsCredentials;
use crate::build::BuildEnvironment;
use crate::error::{Result, SignError};
use crate::process::{Invocation, run_command};
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Signs installers in place with `signtool`
#[derive(Debug, Clone)]
pub struct AuthenticodeSigner {
    credentials: WindowsCredentials,
    timestamp_url: String,
}

impl AuthenticodeSigner {
    /// Signer using the given certificate and timestamp server
    pub fn new(credentials: WindowsCredentials, timestamp_url: impl Into<String>) -> Self {
        Self {
            credentials,
            timestamp_url: timestamp_url.into(),
        }
    }
}

/// Decode a base64 certificate blob, tolerating line wrapping
pub fn decode_certificate(blob: &str) -> Result<Vec<u8>> {
    let compact: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(SignError::InvalidCertificate {
            reason: "certificate blob is empty".to_string(),
        }
        .into());
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SignError::InvalidCertificate {
            reason: e.to_string(),
        })?;
    Ok(decoded)
}

#[async_trait]
impl ArtifactSigner for AuthenticodeSigner {
    async fn sign(&self, artifact: &Path, env: &BuildEnvironment) -> Result<PathBuf> {
        let certificate = decode_certificate(&self.credentials.certificate_base64)?;
        let pfx = env.scratch_dir.join("codesign.pfx");
        tokio::fs::write(&pfx, &certificate).await?;

        log::info!("Signing {} with Authenticode", artifact.display());
        let invocation = Invocation::new(
            "signtool",
            [
                "sign".to_string(),
                "/f".to_string(),
                pfx.display().to_string(),
                "/p".to_string(),
                self.credentials.password.clone(),
                "/fd".to_string(),
                "sha256".to_string(),
                "/tr".to_string(),
                self.timestamp_url.clone(),
                "/td".to_string(),
                "sha256".to_string(),
                artifact.display().to_string(),
            ],
        );
        let result = run_command(&invocation).await;
        let _ = tokio::fs::remove_file(&pfx).await;

        let output = result?;
        if !output.success() {
            return Err(SignError::Signing {
                platform: "windows".to_string(),
                reason: output.failure_reason(),
            }
            .into());
        }

        log::info!("✓ Signed {}", artifact.display());
        Ok(artifact.to_path_buf())
    }
}
