//! Notarization submission.

use super::credentials::MacosCredentials;
use crate::error::{Result, SignError};
use crate::process::{Invocation, run_command};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// Final answer from the notarization service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotarizationVerdict {
    /// Ticket issued
    Accepted {
        /// Submission identifier
        submission_id: String,
    },
    /// Submission refused; fatal to the job
    Rejected {
        /// Submission identifier
        submission_id: String,
        /// Status reported by the service
        status: String,
    },
}

/// Asynchronous notarization service
#[async_trait]
pub trait Notarizer: Send + Sync {
    /// Submit `artifact` and wait for the verdict.
    ///
    /// Transport problems are `SignError::NotaryService` (retried by the
    /// caller); a verdict, even a rejection, is `Ok`.
    async fn submit(&self, artifact: &Path) -> Result<NotarizationVerdict>;

    /// Attach the ticket to an accepted artifact
    async fn staple(&self, artifact: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// Parse `notarytool submit --output-format json` output
pub fn parse_submission(stdout: &str) -> Result<NotarizationVerdict> {
    let response: SubmissionResponse =
        serde_json::from_str(stdout.trim()).map_err(|e| SignError::NotaryService {
            reason: format!("unreadable notarytool output: {}", e),
        })?;

    let submission_id = response.id.unwrap_or_default();
    match response.status.as_deref() {
        Some("Accepted") => Ok(NotarizationVerdict::Accepted { submission_id }),
        Some(status @ ("Invalid" | "Rejected")) => Ok(NotarizationVerdict::Rejected {
            submission_id,
            status: status.to_string(),
        }),
        Some(other) => Err(SignError::NotaryService {
            reason: format!("submission {} ended as '{}'", submission_id, other),
        }
        .into()),
        None => Err(SignError::NotaryService {
            reason: response
                .message
                .unwrap_or_else(|| "response carried no status".to_string()),
        }
        .into()),
    }
}

/// [`Notarizer`] backed by `xcrun notarytool` and `xcrun stapler`
#[derive(Debug, Clone)]
pub struct NotaryTool {
    credentials: MacosCredentials,
}

impl NotaryTool {
    /// Notarizer for the given Apple account
    pub fn new(credentials: MacosCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Notarizer for NotaryTool {
    async fn submit(&self, artifact: &Path) -> Result<NotarizationVerdict> {
        log::info!("Submitting {} for notarization", artifact.display());
        let invocation = Invocation::new(
            "xcrun",
            [
                "notarytool".to_string(),
                "submit".to_string(),
                artifact.display().to_string(),
                "--apple-id".to_string(),
                self.credentials.apple_id.clone(),
                "--password".to_string(),
                self.credentials.apple_password.clone(),
                "--team-id".to_string(),
                self.credentials.team_id.clone(),
                "--wait".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
        );
        let output = run_command(&invocation).await?;

        // notarytool exits non-zero for rejected submissions but still prints the verdict.
        match parse_submission(&output.stdout) {
            Ok(verdict) => Ok(verdict),
            Err(_) if !output.success() => Err(SignError::NotaryService {
                reason: output.failure_reason(),
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    async fn staple(&self, artifact: &Path) -> Result<()> {
        let invocation = Invocation::new(
            "xcrun",
            ["stapler".to_string(), "staple".to_string(), artifact.display().to_string()],
        );
        let output = run_command(&invocation).await?;
        if !output.success() {
            return Err(SignError::Staple {
                artifact: artifact.display().to_string(),
                reason: output.failure_reason(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn accepted_submission() {
        let verdict = parse_submission(
            r#"{"id":"2efe2717-52ef-43a5-96dc-0797e4ca1041","status":"Accepted","message":"Processing complete"}"#,
        )
        .expect("verdict");
        assert_eq!(
            verdict,
            NotarizationVerdict::Accepted {
                submission_id: "2efe2717-52ef-43a5-96dc-0797e4ca1041".to_string()
            }
        );
    }

    #[test]
    fn invalid_submission_is_a_rejection() {
        let verdict = parse_submission(r#"{"id":"abc","status":"Invalid","message":"Processing complete"}"#)
            .expect("verdict");
        assert!(matches!(verdict, NotarizationVerdict::Rejected { ref status, .. } if status == "Invalid"));
    }

    #[test]
    fn garbage_output_is_a_transient_service_error() {
        let err = parse_submission("Error: HTTP status code: 503").expect_err("garbage");
        assert!(matches!(err, PipelineError::Sign(SignError::NotaryService { .. })));
        assert!(err.is_recoverable());
    }

    #[test]
    fn in_progress_is_not_a_verdict() {
        let err = parse_submission(r#"{"id":"abc","status":"In Progress"}"#).expect_err("no verdict");
        assert!(err.is_recoverable());
    }
}
