//! Pipeline configuration.
//!
//! Three sources, in order of precedence:
//! - command line flags (see [`crate::cli::Args`])
//! - the pipeline file (`pipeline.toml`), parsed into [`PipelineConfig`]
//! - built-in defaults
//!
//! Credentials and retry limits come from an [`EnvConfig`] snapshot taken
//! once at startup and passed down explicitly.

use crate::error::{ConfigError, Result};
use crate::process::CommandTemplate;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pipeline file name, looked up in the source checkout
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

/// Immutable snapshot of environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    vars: HashMap<String, String>,
}

impl EnvConfig {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a non-empty variable
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }
}

/// What a cache miss under strict cache mode does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMissPolicy {
    /// Fail the affected job only; siblings continue
    #[default]
    FailJob,
    /// Fail the affected job and skip every job not yet finished
    AbortRun,
}

/// Configuration for retry behavior across different operation types
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Max retries for notarization submissions
    pub notarization: u32,
    /// Minutes to wait for one notarization attempt
    pub notarization_attempt_minutes: u64,
    /// Max retries for release asset uploads
    pub file_uploads: u32,
    /// Max retries for remote cache access
    pub cache_access: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            notarization: 3,
            notarization_attempt_minutes: 30,
            file_uploads: 5,
            cache_access: 2,
        }
    }
}

impl RetryConfig {
    /// Parse retry count from environment with clamping to maximum
    fn parse_retry_env(env: &EnvConfig, var_name: &str, default: u64, max: u64) -> u64 {
        env.get(var_name)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|v| v.min(max))
            .unwrap_or(default)
    }

    /// Create config from environment variables with fallback to defaults
    pub fn from_env(env: &EnvConfig) -> Self {
        Self {
            notarization: Self::parse_retry_env(env, "KODEGEN_RETRY_NOTARIZE", 3, 10) as u32,
            notarization_attempt_minutes: Self::parse_retry_env(
                env,
                "KODEGEN_NOTARIZE_TIMEOUT_MINUTES",
                30,
                120,
            ),
            file_uploads: Self::parse_retry_env(env, "KODEGEN_RETRY_UPLOADS", 5, 20) as u32,
            cache_access: Self::parse_retry_env(env, "KODEGEN_RETRY_CACHE", 2, 10) as u32,
        }
    }

    /// Per-attempt notarization timeout
    pub fn notarization_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.notarization_attempt_minutes * 60)
    }

    /// Bounds for notarization: long attempts, long backoff, hard overall deadline
    pub fn notarization_policy(&self) -> RetryPolicy {
        let attempt = self.notarization_attempt_timeout();
        RetryPolicy {
            max_retries: self.notarization,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            absolute_timeout: attempt.saturating_mul(self.notarization + 1)
                + Duration::from_secs(300) * self.notarization,
            attempt_timeout: Some(attempt),
        }
    }

    /// Bounds for a single release asset upload
    pub fn upload_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Some(Duration::from_secs(600)),
            ..RetryPolicy::with_retries(self.file_uploads)
        }
    }

    /// Bounds for one cache store access
    pub fn cache_policy(&self) -> RetryPolicy {
        RetryPolicy {
            absolute_timeout: Duration::from_secs(600),
            ..RetryPolicy::with_retries(self.cache_access)
        }
    }
}

/// One named subcomponent and its pinned-revision marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcomponentConfig {
    /// Package name
    pub name: String,
    /// Marker file, relative to the source checkout
    pub marker: PathBuf,
}

/// Runner and architecture overrides for one platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOverride {
    /// Runner class to schedule the job on
    pub runner: Option<String>,
    /// Architecture tag used in cache keys and artifact names
    pub arch: Option<String>,
}

/// External collaborator commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Optional environment provisioning step
    pub provision: Option<CommandTemplate>,
    /// Rebuilds the top-level package from source (skipped in release mode)
    pub rebuild_package: CommandTemplate,
    /// Builds one subcomponent package from source
    pub build_subcomponent: CommandTemplate,
    /// Builds the installer and writes a JSON report
    pub build_installer: CommandTemplate,
    /// Unattended install, per platform family
    pub install_windows: CommandTemplate,
    /// Unattended install on macOS
    pub install_macos: CommandTemplate,
    /// Unattended install on Linux
    pub install_linux: CommandTemplate,
    /// Prints the installed product version (Windows)
    pub version_windows: CommandTemplate,
    /// Prints the installed product version (Linux)
    pub version_unix: CommandTemplate,
    /// Prints the version of the app bundle expanded into the prefix (macOS)
    pub version_macos: CommandTemplate,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            provision: None,
            rebuild_package: CommandTemplate::new(
                "python",
                [
                    "installers-conda/build_conda_pkgs.py",
                    "--build",
                    "{product}",
                    "--python",
                    "{runtime}",
                    "--channel",
                    "{channel}",
                ],
            ),
            build_subcomponent: CommandTemplate::new(
                "python",
                [
                    "installers-conda/build_conda_pkgs.py",
                    "--build",
                    "{component}",
                    "--python",
                    "{runtime}",
                    "--channel",
                    "{output}",
                ],
            ),
            build_installer: CommandTemplate::new(
                "python",
                [
                    "installers-conda/build_installers.py",
                    "--arch",
                    "{arch}",
                    "--channel",
                    "{channel}",
                    "--output",
                    "{output}",
                    "--report",
                    "{report}",
                ],
            ),
            install_windows: CommandTemplate::new(
                "{artifact}",
                ["/InstallationType=JustMe", "/NoRegistry=1", "/S", "/D={prefix}"],
            ),
            install_macos: CommandTemplate::new(
                "pkgutil",
                ["--expand-full", "{artifact}", "{prefix}"],
            ),
            install_linux: CommandTemplate::new("bash", ["{artifact}", "-b", "-p", "{prefix}"]),
            version_windows: CommandTemplate::new(
                "{prefix}\\python.exe",
                ["-c", "import spyder; print(spyder.__version__)"],
            ),
            version_unix: CommandTemplate::new(
                "{prefix}/bin/python",
                ["-c", "import spyder; print(spyder.__version__)"],
            ),
            version_macos: CommandTemplate::new(
                "sh",
                [
                    "-c",
                    "plist=$(find \"$1\" -path '*/Spyder.app/Contents/Info.plist' -print -quit) \
                     && test -n \"$plist\" \
                     && /usr/libexec/PlistBuddy -c 'Print :CFBundleShortVersionString' \"$plist\"",
                    "sh",
                    "{prefix}",
                ],
            ),
        }
    }
}

/// Contents of `pipeline.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Product name used in asset names
    pub product_name: String,
    /// Branch built on scheduled runs
    pub mainline_branch: String,
    /// Pinned language-runtime version
    pub runtime_version: String,
    /// Subcomponent registry
    pub subcomponents: Vec<SubcomponentConfig>,
    /// Per-platform runner/arch overrides, keyed by platform id
    pub targets: HashMap<String, TargetOverride>,
    /// Root of the read-shared package cache
    pub cache_dir: Option<PathBuf>,
    /// Per-job isolated environments live here
    pub work_dir: PathBuf,
    /// Aggregated artifacts and checksum manifest
    pub dist_dir: PathBuf,
    /// Behavior on strict-mode cache misses
    pub cache_miss_policy: CacheMissPolicy,
    /// GitHub repository (owner/repo) for release uploads
    pub github_repo: Option<String>,
    /// Timestamp server for Authenticode signatures
    pub timestamp_url: String,
    /// Minutes before an unattended install is considered hung
    pub install_timeout_minutes: u64,
    /// Collaborator commands
    pub commands: CommandsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            product_name: "Spyder".to_string(),
            mainline_branch: "main".to_string(),
            runtime_version: "3.11".to_string(),
            subcomponents: ["spyder-kernels", "python-lsp-server", "qtconsole"]
                .iter()
                .map(|name| SubcomponentConfig {
                    name: name.to_string(),
                    marker: PathBuf::from("external-deps").join(name).join(".gitrepo"),
                })
                .collect(),
            targets: HashMap::new(),
            cache_dir: None,
            work_dir: PathBuf::from("target/pipeline/work"),
            dist_dir: PathBuf::from("target/pipeline/dist"),
            cache_miss_policy: CacheMissPolicy::FailJob,
            github_repo: None,
            timestamp_url: "http://timestamp.digicert.com".to_string(),
            install_timeout_minutes: 20,
            commands: CommandsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&contents, path)
    }

    /// Load `pipeline.toml` from the checkout if present, defaults otherwise
    pub fn discover(source_root: &Path) -> Result<Self> {
        let candidate = source_root.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            log::info!("Using pipeline configuration {}", candidate.display());
            Self::load(&candidate)
        } else {
            log::debug!("No {} found, using defaults", candidate.display());
            Ok(Self::default())
        }
    }

    /// Parse TOML contents; `origin` is used for error messages only
    pub fn parse(contents: &str, origin: &Path) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(contents).map_err(|e| ConfigError::InvalidFile {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the type system does not enforce
    pub fn validate(&self) -> Result<()> {
        if self.mainline_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mainline_branch".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if self.runtime_version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "runtime_version".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let mut seen = std::collections::HashSet::new();
        for component in &self.subcomponents {
            if !seen.insert(component.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "subcomponents".to_string(),
                    reason: format!("duplicate subcomponent '{}'", component.name),
                }
                .into());
            }
        }

        for key in self.targets.keys() {
            if crate::matrix::Platform::from_id(key).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("targets.{}", key),
                    reason: "unknown platform id".to_string(),
                }
                .into());
            }
        }

        if let Some(repo) = &self.github_repo
            && repo.split('/').filter(|part| !part.is_empty()).count() != 2
        {
            return Err(ConfigError::InvalidValue {
                field: "github_repo".to_string(),
                reason: format!("expected owner/repo, got '{}'", repo),
            }
            .into());
        }

        Ok(())
    }

    /// Cache root, defaulting to the user cache directory
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("kodegen")
                .join("pipeline-cache")
        })
    }

    /// Name of the checksum manifest asset
    pub fn checksum_file_name(&self) -> String {
        format!("{}-checksums.txt", self.product_name)
    }

    /// Install timeout as a duration
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_standard_registry() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        let names: Vec<_> = config.subcomponents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["spyder-kernels", "python-lsp-server", "qtconsole"]);
        assert_eq!(config.checksum_file_name(), "Spyder-checksums.txt");
    }

    #[test]
    fn parses_partial_file_over_defaults() {
        let toml = r#"
            product_name = "Demo"
            mainline_branch = "master"
            cache_miss_policy = "abort-run"

            [[subcomponents]]
            name = "kernels"
            marker = "deps/kernels/.gitrepo"

            [targets.windows]
            runner = "windows-2022"
        "#;
        let config = PipelineConfig::parse(toml, Path::new("pipeline.toml"))
            .expect("valid configuration");

        assert_eq!(config.product_name, "Demo");
        assert_eq!(config.mainline_branch, "master");
        assert_eq!(config.cache_miss_policy, CacheMissPolicy::AbortRun);
        assert_eq!(config.subcomponents.len(), 1);
        assert_eq!(config.targets["windows"].runner.as_deref(), Some("windows-2022"));
        assert_eq!(config.runtime_version, "3.11");
    }

    #[test]
    fn rejects_unknown_platform_override() {
        let toml = r#"
            [targets.solaris]
            runner = "sun"
        "#;
        assert!(PipelineConfig::parse(toml, Path::new("pipeline.toml")).is_err());
    }

    #[test]
    fn rejects_duplicate_subcomponents() {
        let toml = r#"
            [[subcomponents]]
            name = "a"
            marker = "a"
            [[subcomponents]]
            name = "a"
            marker = "b"
        "#;
        assert!(PipelineConfig::parse(toml, Path::new("pipeline.toml")).is_err());
    }

    #[test]
    fn retry_env_is_clamped() {
        let env = EnvConfig::from_pairs([
            ("KODEGEN_RETRY_NOTARIZE", "99"),
            ("KODEGEN_RETRY_UPLOADS", "not-a-number"),
        ]);
        let retry = RetryConfig::from_env(&env);
        assert_eq!(retry.notarization, 10);
        assert_eq!(retry.file_uploads, 5);
    }

    #[test]
    fn notarization_policy_is_bounded() {
        let policy = RetryConfig::default().notarization_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.attempt_timeout, Some(Duration::from_secs(30 * 60)));
        assert!(policy.absolute_timeout >= Duration::from_secs(4 * 30 * 60));
    }

    #[test]
    fn env_snapshot_ignores_blank_values() {
        let env = EnvConfig::from_pairs([("GH_TOKEN", "  "), ("GITHUB_TOKEN", "abc")]);
        assert_eq!(env.get("GH_TOKEN"), None);
        assert_eq!(env.get("GITHUB_TOKEN").as_deref(), Some("abc"));
    }
}
