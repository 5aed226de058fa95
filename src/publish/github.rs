//! GitHub release publication.

use crate::config::EnvConfig;
use crate::error::{ConfigError, PublishError, Result};
use crate::retry::{RetryPolicy, retry_with_backoff};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Release record identified by the triggering event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Release tag
    pub tag: String,
}

/// One file to upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// Local file
    pub path: PathBuf,
    /// Asset name on the release
    pub name: String,
}

/// Result of one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum UploadStatus {
    /// Uploaded during this run
    Uploaded,
    /// Already present on the release; left untouched
    AlreadyPresent,
    /// Upload failed
    Failed {
        /// Reason for the failure
        reason: String,
    },
}

/// Per-asset upload report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Asset name
    pub name: String,
    /// What happened
    pub status: UploadStatus,
}

impl UploadOutcome {
    /// Whether the asset is on the release after this run
    pub fn is_ok(&self) -> bool {
        !matches!(self.status, UploadStatus::Failed { .. })
    }
}

/// Uploads assets to a release record
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    /// Upload each asset, reporting success or failure per item.
    ///
    /// An `Err` means the release itself could not be reached; individual
    /// asset failures are reported in the outcomes.
    async fn upload(
        &self,
        release: &ReleaseRecord,
        assets: &[ReleaseAsset],
        cancel: &CancellationToken,
    ) -> Result<Vec<UploadOutcome>>;
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    upload_url: String,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    name: String,
}

/// One-time initialization guard for rustls crypto provider
static RUSTLS_INITIALIZED: OnceLock<()> = OnceLock::new();

const API_ROOT: &str = "https://api.github.com";

/// [`ReleasePublisher`] for GitHub releases
pub struct GitHubPublisher {
    client: reqwest::Client,
    owner: String,
    repo: String,
    token: String,
    api_root: String,
    retry: RetryPolicy,
}

impl GitHubPublisher {
    /// Publisher for `owner/repo`, token from `GH_TOKEN` or `GITHUB_TOKEN`
    pub fn new(repository: &str, env_config: &EnvConfig, retry: RetryPolicy) -> Result<Self> {
        RUSTLS_INITIALIZED.get_or_init(|| {
            // Err: a provider is already installed.
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        let token = env_config
            .get("GH_TOKEN")
            .or_else(|| env_config.get("GITHUB_TOKEN"))
            .ok_or(PublishError::MissingToken)?;

        let (owner, repo) = repository.split_once('/').ok_or_else(|| PublishError::Api {
            reason: format!("expected owner/repo, got '{}'", repository),
        })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("kodegen-bundler-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::Api {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
            api_root: API_ROOT.to_string(),
            retry,
        })
    }

    /// Point the publisher at a different API root (GitHub Enterprise)
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    /// `{api_root}/repos/{owner}/{repo}/releases/tags/{tag}`, each segment percent-encoded
    fn release_url(&self, tag: &str) -> Result<reqwest::Url> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "api_root".to_string(),
            reason,
        };
        let mut url = reqwest::Url::parse(&self.api_root)
            .map_err(|e| invalid(format!("'{}': {}", self.api_root, e)))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("'{}' is not a base URL", self.api_root)))?
            .pop_if_empty()
            .extend([
                "repos",
                self.owner.as_str(),
                self.repo.as_str(),
                "releases",
                "tags",
                tag,
            ]);
        Ok(url)
    }

    async fn release_by_tag(&self, tag: &str) -> Result<ReleaseResponse> {
        let url = self.release_url(tag)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| PublishError::Api {
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PublishError::ReleaseNotFound {
                tag: tag.to_string(),
            }
            .into());
        }
        let response = response.error_for_status().map_err(|e| {
            status_error(e, "fetch release", |reason| PublishError::Api { reason })
        })?;

        Ok(response
            .json::<ReleaseResponse>()
            .await
            .map_err(|e| PublishError::Api {
                reason: e.to_string(),
            })?)
    }

    async fn upload_one(&self, upload_url: &str, asset: &ReleaseAsset, content: Bytes) -> Result<()> {
        let response = self
            .client
            .post(upload_url)
            .bearer_auth(&self.token)
            .query(&[("name", asset.name.as_str())])
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| PublishError::Upload {
                asset: asset.name.clone(),
                reason: e.to_string(),
            })?;

        response.error_for_status().map_err(|e| {
            status_error(e, &format!("upload {}", asset.name), |reason| {
                PublishError::Upload {
                    asset: asset.name.clone(),
                    reason,
                }
            })
        })?;
        Ok(())
    }
}

/// Client errors other than 429 cannot succeed on retry
fn is_rejection(status: reqwest::StatusCode) -> bool {
    status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

fn status_error(
    error: reqwest::Error,
    request: &str,
    transient: impl FnOnce(String) -> PublishError,
) -> PublishError {
    match error.status() {
        Some(status) if is_rejection(status) => PublishError::Rejected {
            request: request.to_string(),
            status: status.as_u16(),
            reason: error.to_string(),
        },
        _ => transient(error.to_string()),
    }
}

/// Strip the `{?name,label}` template suffix from an upload URL
fn upload_endpoint(upload_url: &str) -> &str {
    upload_url.split('{').next().unwrap_or(upload_url)
}

#[async_trait]
impl ReleasePublisher for GitHubPublisher {
    async fn upload(
        &self,
        release: &ReleaseRecord,
        assets: &[ReleaseAsset],
        cancel: &CancellationToken,
    ) -> Result<Vec<UploadOutcome>> {
        let record = retry_with_backoff(
            || self.release_by_tag(&release.tag),
            &self.retry,
            "fetch release",
            cancel,
        )
        .await?;
        log::debug!("Release {} has id {}", release.tag, record.id);

        // Query existing assets ONCE before upload loop
        let existing: HashSet<&str> = record.assets.iter().map(|a| a.name.as_str()).collect();
        let endpoint = upload_endpoint(&record.upload_url);

        let mut outcomes = Vec::with_capacity(assets.len());
        for asset in assets {
            if existing.contains(asset.name.as_str()) {
                log::info!("✓ Skipping {} (already uploaded)", asset.name);
                outcomes.push(UploadOutcome {
                    name: asset.name.clone(),
                    status: UploadStatus::AlreadyPresent,
                });
                continue;
            }

            let status = match tokio::fs::read(&asset.path).await {
                Err(e) => UploadStatus::Failed {
                    reason: format!("cannot read {}: {}", asset.path.display(), e),
                },
                Ok(content) => {
                    let content = Bytes::from(content);
                    let uploaded = retry_with_backoff(
                        || self.upload_one(endpoint, asset, content.clone()),
                        &self.retry,
                        &format!("upload {}", asset.name),
                        cancel,
                    )
                    .await;
                    match uploaded {
                        Ok(()) => {
                            log::info!("✓ Uploaded {}", asset.name);
                            UploadStatus::Uploaded
                        }
                        Err(crate::error::PipelineError::Cancelled) => {
                            return Err(crate::error::PipelineError::Cancelled);
                        }
                        Err(e) => UploadStatus::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            };

            outcomes.push(UploadOutcome {
                name: asset.name.clone(),
                status,
            });
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_url_template_is_stripped() {
        assert_eq!(
            upload_endpoint("https://uploads.github.com/repos/spyder-ide/spyder/releases/1/assets{?name,label}"),
            "https://uploads.github.com/repos/spyder-ide/spyder/releases/1/assets"
        );
    }

    #[test]
    fn release_tag_is_percent_encoded() {
        let env = EnvConfig::from_pairs([("GH_TOKEN", "t")]);
        let publisher = GitHubPublisher::new("spyder-ide/spyder", &env, RetryPolicy::default())
            .expect("publisher")
            .with_api_root("https://ghe.example.com/api/v3/");
        let url = publisher.release_url("v6.0.0 rc/1#x?").expect("url");
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/spyder-ide/spyder/releases/tags/v6.0.0%20rc%2F1%23x%3F"
        );
    }

    #[test]
    fn client_errors_except_rate_limits_are_rejections() {
        use reqwest::StatusCode;
        assert!(is_rejection(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(is_rejection(StatusCode::NOT_FOUND));
        assert!(!is_rejection(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_rejection(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn publisher_requires_a_token() {
        let err = GitHubPublisher::new("spyder-ide/spyder", &EnvConfig::default(), RetryPolicy::default())
            .err()
            .expect("no token");
        assert!(matches!(
            err,
            crate::error::PipelineError::Publish(PublishError::MissingToken)
        ));
    }

    #[test]
    fn failed_outcome_is_not_ok() {
        let outcome = UploadOutcome {
            name: "Spyder.pkg".to_string(),
            status: UploadStatus::Failed {
                reason: "502".to_string(),
            },
        };
        assert!(!outcome.is_ok());
        let json = serde_json::to_string(&outcome).expect("json");
        assert!(json.contains("\"state\":\"failed\""));
    }
}
