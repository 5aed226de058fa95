//! Shared helper functions for command execution.

use crate::cli::Args;
use crate::config::PipelineConfig;
use crate::error::{CliError, PipelineError, Result};

/// Load the pipeline configuration named by `--config`, or discover it in the repo
pub(super) fn load_config(args: &Args) -> Result<PipelineConfig> {
    match &args.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::discover(&args.repo),
    }
}

/// Parse `owner/repo` from a git remote URL
///
/// Supports Git URL formats:
/// - SSH SCP-like: git@github.com:owner/repo.git
/// - HTTPS: https://github.com/owner/repo.git
pub(super) fn parse_github_url(url: &str) -> Result<String> {
    let path = if let Some((_, path)) = url.split_once("github.com/") {
        path
    } else if !url.contains("://")
        && let Some((_, path)) = url.split_once(':')
    {
        path
    } else {
        ""
    };

    let mut parts = path.trim_end_matches('/').trim_end_matches(".git").split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            Ok(format!("{}/{}", owner, repo))
        }
        _ => Err(PipelineError::Cli(CliError::InvalidArguments {
            reason: format!("Could not parse GitHub owner/repo from URL: '{}'", url),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_and_https_remotes() {
        assert_eq!(
            parse_github_url("git@github.com:cyrup-ai/kodegen.git").expect("ssh"),
            "cyrup-ai/kodegen"
        );
        assert_eq!(
            parse_github_url("https://github.com/cyrup-ai/kodegen.git").expect("https"),
            "cyrup-ai/kodegen"
        );
        assert_eq!(
            parse_github_url("https://github.com/cyrup-ai/kodegen").expect("no suffix"),
            "cyrup-ai/kodegen"
        );
    }

    #[test]
    fn rejects_urls_without_owner_and_repo() {
        assert!(parse_github_url("https://example.com/").is_err());
        assert!(parse_github_url("/srv/git/kodegen").is_err());
    }
}
