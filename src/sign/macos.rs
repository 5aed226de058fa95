//! macOS installer signing with an ephemeral keychain.

use super::ArtifactSigner;
use super::credentials::MacosCredentials;
use super::windows::decode_certificate;
use crate::build::BuildEnvironment;
use crate::error::{PipelineError, Result, SignError};
use crate::process::{Invocation, run_command};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wait_timeout::ChildExt;

/// RAII guard for an ephemeral keychain.
///
/// Deletes the keychain when dropped, so the identity never outlives the job
/// even on error or cancellation. Deletion is bounded by a timeout.
pub struct TempKeychain {
    path: PathBuf,
    password: String,
}

impl TempKeychain {
    /// Create and unlock a keychain at `path`, then import the P12 identity
    pub async fn create(path: PathBuf, certificate: &[u8], certificate_password: &str) -> Result<Self> {
        let password = uuid::Uuid::new_v4().simple().to_string();
        let keychain = path.display().to_string();

        keychain_step(&["create-keychain", "-p", &password, &keychain]).await?;
        // From here on, dropping the guard removes the keychain.
        let guard = Self {
            path: path.clone(),
            password,
        };

        keychain_step(&["set-keychain-settings", "-lut", "21600", &keychain]).await?;
        keychain_step(&["unlock-keychain", "-p", &guard.password, &keychain]).await?;

        let p12 = path.with_extension("p12");
        tokio::fs::write(&p12, certificate).await?;
        let imported = keychain_step(&[
            "import",
            &p12.display().to_string(),
            "-P",
            certificate_password,
            "-A",
            "-t",
            "cert",
            "-f",
            "pkcs12",
            "-k",
            &keychain,
        ])
        .await;
        let _ = tokio::fs::remove_file(&p12).await;
        imported?;

        keychain_step(&["list-keychains", "-d", "user", "-s", &keychain]).await?;
        Ok(guard)
    }

    /// Keychain path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn keychain_step(args: &[&str]) -> Result<()> {
    let output = run_command(&Invocation::new("security", args.iter().copied())).await?;
    if !output.success() {
        return Err(SignError::Keychain {
            reason: format!("security {}: {}", args[0], output.failure_reason()),
        }
        .into());
    }
    Ok(())
}

impl Drop for TempKeychain {
    fn drop(&mut self) {
        let mut child = match std::process::Command::new("security")
            .arg("delete-keychain")
            .arg(&self.path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(_) => return,
        };

        let timeout = Duration::from_secs(5);
        match child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                if !status.success() {
                    log::warn!(
                        "Failed to delete keychain {} (exit code: {})",
                        self.path.display(),
                        status.code().unwrap_or(-1)
                    );
                }
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                log::warn!(
                    "Timed out deleting keychain {} after {} seconds",
                    self.path.display(),
                    timeout.as_secs()
                );
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Signs `.pkg` installers with `productsign`
#[derive(Debug, Clone)]
pub struct ProductSigner {
    credentials: MacosCredentials,
}

impl ProductSigner {
    /// Signer for the given identity
    pub fn new(credentials: MacosCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ArtifactSigner for ProductSigner {
    async fn sign(&self, artifact: &Path, env: &BuildEnvironment) -> Result<PathBuf> {
        let certificate = decode_certificate(&self.credentials.certificate_base64)?;
        let keychain = TempKeychain::create(
            env.scratch_dir.join("build.keychain-db"),
            &certificate,
            &self.credentials.certificate_password,
        )
        .await?;

        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let unsigned = env.scratch_dir.join(format!("unsigned-{}", file_name));
        tokio::fs::rename(artifact, &unsigned).await?;

        log::info!(
            "Signing {} as {}",
            artifact.display(),
            self.credentials.signing_identity
        );
        let invocation = Invocation::new(
            "productsign",
            [
                "--sign".to_string(),
                self.credentials.signing_identity.clone(),
                "--keychain".to_string(),
                keychain.path().display().to_string(),
                unsigned.display().to_string(),
                artifact.display().to_string(),
            ],
        );
        let result = run_command(&invocation).await;
        drop(keychain);

        let failure: Option<PipelineError> = match result {
            Ok(output) if output.success() => None,
            Ok(output) => Some(
                SignError::Signing {
                    platform: "macos".to_string(),
                    reason: output.failure_reason(),
                }
                .into(),
            ),
            Err(e) => Some(e),
        };
        if let Some(err) = failure {
            let _ = tokio::fs::rename(&unsigned, artifact).await;
            return Err(err);
        }

        let _ = tokio::fs::remove_file(&unsigned).await;
        log::info!("✓ Signed {}", artifact.display());
        Ok(artifact.to_path_buf())
    }
}
