//! Error types for pipeline operations.
//!
//! Every component has its own error enum. [`PipelineError`] wraps them so a
//! job can report exactly which stage failed and the run can decide whether the
//! failure is run-level (configuration) or job-local.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Run-level configuration errors, raised before any job is scheduled
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Subcomponent cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Environment provisioning and installer build errors
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Code signing and notarization errors
    #[error("Signing error: {0}")]
    Sign(#[from] SignError),

    /// Installer verification errors
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    /// Checksum and release upload errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// CLI argument and external command errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// A bounded operation ran past its deadline
    #[error("{operation} timed out after {seconds:.1}s")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Elapsed seconds
        seconds: f64,
    },

    /// The run was cancelled while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Configuration errors. These are fatal and never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Trigger kind is not one of the known event kinds
    #[error("Unknown trigger event kind '{kind}'")]
    UnknownTrigger {
        /// Kind as supplied
        kind: String,
    },

    /// Signing is required but the credential is absent
    #[error("Signing is required for {platform} but {variable} is not set")]
    MissingCredential {
        /// Platform that needs the credential
        platform: String,
        /// Environment variable that should carry it
        variable: String,
    },

    /// Release mode without a release record to publish to
    #[error("Release mode requires a release tag (--release-tag)")]
    MissingReleaseTag,

    /// Pipeline configuration file could not be read or parsed
    #[error("Invalid pipeline configuration at {path}: {reason}")]
    InvalidFile {
        /// Path to the configuration file
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// A configuration value is out of range or malformed
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for the error
        reason: String,
    },

    /// The stage graph contains a cycle
    #[error("Stage graph is not acyclic (cycle through '{stage}')")]
    CyclicStageGraph {
        /// A stage on the cycle
        stage: String,
    },
}

/// Subcomponent cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Strict cache mode and no exact match for the key
    #[error("No cached package for subcomponent '{component}' (key {key})")]
    Unavailable {
        /// Subcomponent name
        component: String,
        /// Rendered cache key
        key: String,
    },

    /// The pinned-revision marker could not be read
    #[error("Cannot read pinned revision marker {path}: {source}")]
    MarkerUnreadable {
        /// Marker path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Cache store backend failure
    #[error("Cache store failure: {reason}")]
    Store {
        /// Reason for the error
        reason: String,
    },
}

/// Environment provisioning and installer build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Isolated environment could not be provisioned
    #[error("Failed to provision environment for {target}: {reason}")]
    Provision {
        /// Platform identifier
        target: String,
        /// Reason for the error
        reason: String,
    },

    /// Top-level package rebuild failed
    #[error("Package rebuild failed for {target}: {reason}")]
    PackageRebuild {
        /// Platform identifier
        target: String,
        /// Reason for the error
        reason: String,
    },

    /// Subcomponent build from source failed
    #[error("Subcomponent '{component}' build failed: {reason}")]
    Subcomponent {
        /// Subcomponent name
        component: String,
        /// Reason for the error
        reason: String,
    },

    /// Installer builder failed
    #[error("Installer build failed for {target}: {reason}")]
    Installer {
        /// Platform identifier
        target: String,
        /// Reason for the error
        reason: String,
    },

    /// Builder reported success but the artifact is missing or empty
    #[error("Builder reported artifact {path} but it is missing or empty")]
    MissingArtifact {
        /// Reported path
        path: PathBuf,
    },

    /// Builder report could not be parsed
    #[error("Invalid builder report at {path}: {reason}")]
    InvalidReport {
        /// Report path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },
}

/// Code signing and notarization errors
#[derive(Error, Debug)]
pub enum SignError {
    /// Certificate blob could not be decoded
    #[error("Invalid certificate data: {reason}")]
    InvalidCertificate {
        /// Reason for the error
        reason: String,
    },

    /// Ephemeral keychain setup failed
    #[error("Keychain setup failed: {reason}")]
    Keychain {
        /// Reason for the error
        reason: String,
    },

    /// Signing tool failed
    #[error("Signing failed for {platform}: {reason}")]
    Signing {
        /// Platform identifier
        platform: String,
        /// Reason for the error
        reason: String,
    },

    /// Notarization service rejected the submission
    #[error("Notarization rejected for {artifact} (submission {submission_id}, status {status})")]
    NotarizationRejected {
        /// Artifact file name
        artifact: String,
        /// Submission identifier
        submission_id: String,
        /// Status reported by the service
        status: String,
    },

    /// Notarization service could not be reached or answered garbage
    #[error("Notarization service error: {reason}")]
    NotaryService {
        /// Reason for the error
        reason: String,
    },

    /// Stapling the notarization ticket failed
    #[error("Stapling failed for {artifact}: {reason}")]
    Staple {
        /// Artifact file name
        artifact: String,
        /// Reason for the error
        reason: String,
    },
}

/// Installer verification errors
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Unattended installation failed
    #[error("Installation of {artifact} failed: {reason}")]
    InstallFailed {
        /// Artifact path
        artifact: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Installed product could not report its version
    #[error("Could not read installed version: {reason}")]
    VersionProbe {
        /// Reason for the error
        reason: String,
    },

    /// Installed version differs from the version recorded at build time
    #[error("Installed version mismatch: expected '{expected}', found '{actual}'")]
    Mismatch {
        /// Version recorded at build time
        expected: String,
        /// Version reported by the installed product
        actual: String,
    },
}

/// Checksum and release upload errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// Artifact could not be hashed
    #[error("Failed to checksum {path}: {reason}")]
    Checksum {
        /// Artifact path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// No release record exists for the tag
    #[error("Release '{tag}' not found")]
    ReleaseNotFound {
        /// Release tag
        tag: String,
    },

    /// A single asset upload failed
    #[error("Upload of '{asset}' failed: {reason}")]
    Upload {
        /// Asset name
        asset: String,
        /// Reason for the error
        reason: String,
    },

    /// Release API request failed
    #[error("Release API error: {reason}")]
    Api {
        /// Reason for the error
        reason: String,
    },

    /// The release API refused the request with a client error (4xx other than 429)
    #[error("Release API rejected {request} with HTTP {status}: {reason}")]
    Rejected {
        /// Request that was refused
        request: String,
        /// HTTP status code
        status: u16,
        /// Reason for the error
        reason: String,
    },

    /// No API token available
    #[error("GitHub token not provided. Set GH_TOKEN or GITHUB_TOKEN")]
    MissingToken,
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl PipelineError {
    /// Short machine-readable classification used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "configuration",
            PipelineError::Cache(CacheError::Unavailable { .. }) => "cache-unavailable",
            PipelineError::Cache(_) => "cache",
            PipelineError::Build(_) => "build",
            PipelineError::Sign(SignError::NotarizationRejected { .. }) => "notarization-rejected",
            PipelineError::Sign(_) => "signing",
            PipelineError::Verify(VerifyError::Mismatch { .. }) => "verification-mismatch",
            PipelineError::Verify(_) => "verification",
            PipelineError::Publish(_) => "publish",
            PipelineError::Cli(_) => "command",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
            PipelineError::Other(_) => "other",
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Only transport-level failures qualify. Configuration, cache misses,
    /// rejections and version mismatches are deterministic and never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Sign(SignError::NotaryService { .. })
                | PipelineError::Publish(PublishError::Upload { .. })
                | PipelineError::Publish(PublishError::Api { .. })
                | PipelineError::Cache(CacheError::Store { .. })
                | PipelineError::Timeout { .. }
        )
    }

    /// Whether the error is a cache miss under strict cache mode
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, PipelineError::Cache(CacheError::Unavailable { .. }))
    }

    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PipelineError::Config(ConfigError::UnknownTrigger { .. }) => vec![
                "Use one of: scheduled, pull-request, release-created, manual".to_string(),
            ],
            PipelineError::Config(ConfigError::MissingCredential { variable, .. }) => vec![
                format!("Export {} with the signing credential", variable),
                "Or run with a trigger that does not require notarization".to_string(),
            ],
            PipelineError::Config(ConfigError::MissingReleaseTag) => {
                vec!["Pass --release-tag <tag> for release-created triggers".to_string()]
            }
            PipelineError::Cache(CacheError::Unavailable { component, .. }) => vec![
                format!("The upstream build of '{}' did not complete for this revision", component),
                "Re-run without --skip-subcomponent-build to produce the package".to_string(),
            ],
            PipelineError::Sign(SignError::NotarizationRejected { submission_id, .. }) => vec![
                format!("Inspect the log: xcrun notarytool log {}", submission_id),
            ],
            PipelineError::Verify(VerifyError::Mismatch { .. }) => vec![
                "The installer packs a different version than the builder reported".to_string(),
                "Check the package recipe version and the installer builder inputs".to_string(),
            ],
            PipelineError::Publish(PublishError::MissingToken) => {
                vec!["Export GH_TOKEN or GITHUB_TOKEN with contents:write scope".to_string()]
            }
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_carries_both_versions() {
        let err = PipelineError::from(VerifyError::Mismatch {
            expected: "6.0.0".to_string(),
            actual: "6.0.1".to_string(),
        });
        let message = err.to_string();
        assert!(message.contains("6.0.0"));
        assert!(message.contains("6.0.1"));
        assert_eq!(err.kind(), "verification-mismatch");
    }

    #[test]
    fn only_transport_errors_are_recoverable() {
        let transient = PipelineError::from(SignError::NotaryService {
            reason: "connection reset".to_string(),
        });
        assert!(transient.is_recoverable());

        let rejected = PipelineError::from(SignError::NotarizationRejected {
            artifact: "App.pkg".to_string(),
            submission_id: "abc".to_string(),
            status: "Invalid".to_string(),
        });
        assert!(!rejected.is_recoverable());

        let miss = PipelineError::from(CacheError::Unavailable {
            component: "qtconsole".to_string(),
            key: "k".to_string(),
        });
        assert!(!miss.is_recoverable());
        assert!(miss.is_cache_miss());
    }

    #[test]
    fn rejected_release_requests_are_not_retried() {
        let rejected = PipelineError::from(PublishError::Rejected {
            request: "upload Spyder.pkg".to_string(),
            status: 422,
            reason: "already_exists".to_string(),
        });
        assert!(!rejected.is_recoverable());

        let transient = PipelineError::from(PublishError::Upload {
            asset: "Spyder.pkg".to_string(),
            reason: "502 Bad Gateway".to_string(),
        });
        assert!(transient.is_recoverable());
    }
}
