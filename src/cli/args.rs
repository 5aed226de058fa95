//! Command line argument parsing and validation.

use crate::config::CacheMissPolicy;
use crate::matrix::{Platform, PlatformToggles};
use crate::trigger::{EventKind, ManualOverrides, TriggerEvent};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-platform installer pipeline
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_pipeline",
    version,
    about = "Build, sign, verify and publish installers for every platform",
    long_about = "Runs the installer pipeline for one trigger event.

Usage:
  kodegen_bundler_pipeline plan --event pull-request
  kodegen_bundler_pipeline run --event scheduled --windows false
  kodegen_bundler_pipeline run --event release-created --release-tag v6.1.0"
)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration file (defaults to <repo>/pipeline.toml when present)
    #[arg(long, global = true, env = "KODEGEN_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository checkout the pipeline builds from
    #[arg(long, global = true, default_value = ".", env = "KODEGEN_PIPELINE_REPO")]
    pub repo: PathBuf,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress everything but errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Pipeline subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show flags, matrix, cache keys and stage order without executing
    Plan {
        /// Trigger event
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Leave subcomponent production out of the stage graph
        #[arg(long)]
        skip_subcomponent_build: bool,
    },

    /// Execute the pipeline
    Run {
        /// Trigger event
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Release tag to publish to (release-created only)
        #[arg(long, env = "KODEGEN_PIPELINE_RELEASE_TAG")]
        release_tag: Option<String>,

        /// Skip the subcomponent production stage; cache restores must hit
        #[arg(long)]
        skip_subcomponent_build: bool,

        /// What a cache miss does to the rest of the run
        #[arg(long, value_enum, env = "KODEGEN_PIPELINE_CACHE_MISS")]
        cache_miss_policy: Option<CacheMissPolicy>,
    },

    /// Print the cache key of one subcomponent
    CacheKey {
        /// Subcomponent name
        component: String,

        /// Architecture tag
        #[arg(long)]
        arch: String,
    },

    /// Write a SHA-256 manifest for files
    Checksums {
        /// Files or directories to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Manifest path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Install one installer and check its version
    Verify {
        /// Installer to verify
        installer: PathBuf,

        /// Platform id (macos-x86_64, macos-arm64, linux, windows)
        #[arg(long)]
        platform: String,

        /// Version the installer must report
        #[arg(long)]
        expected_version: String,

        /// Install prefix (defaults to a directory under the work dir)
        #[arg(long)]
        prefix: Option<PathBuf>,
    },
}

/// Trigger event and operator overrides
#[derive(clap::Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Event kind: scheduled, pull-request, release-created, manual
    #[arg(long, env = "KODEGEN_PIPELINE_EVENT", value_parser = parse_event)]
    pub event: EventKind,

    /// Build a pre-release (manual runs only)
    #[arg(long)]
    pub pre_release: Option<bool>,

    /// Open a debug session on failure (manual runs only)
    #[arg(long)]
    pub debug_access: Option<bool>,

    /// Build the macOS Intel installer
    #[arg(long = "macos-x86-64", env = "KODEGEN_PIPELINE_MACOS_X86_64")]
    pub macos_x86_64: Option<bool>,

    /// Build the macOS Apple silicon installer
    #[arg(long = "macos-arm64", env = "KODEGEN_PIPELINE_MACOS_ARM64")]
    pub macos_arm64: Option<bool>,

    /// Build the Linux installer
    #[arg(long, env = "KODEGEN_PIPELINE_LINUX")]
    pub linux: Option<bool>,

    /// Build the Windows installer
    #[arg(long, env = "KODEGEN_PIPELINE_WINDOWS")]
    pub windows: Option<bool>,
}

fn parse_event(value: &str) -> Result<EventKind, String> {
    value.parse::<EventKind>().map_err(|e| e.to_string())
}

impl TriggerArgs {
    /// Typed trigger event
    pub fn to_event(&self, release_tag: Option<&str>) -> TriggerEvent {
        let overrides = ManualOverrides {
            pre_release: self.pre_release,
            debug_access: self.debug_access,
            platforms: PlatformToggles {
                macos_x86_64: self.macos_x86_64,
                macos_arm64: self.macos_arm64,
                linux: self.linux,
                windows: self.windows,
            },
        };
        let event = TriggerEvent::new(self.event).with_overrides(overrides);
        match release_tag {
            Some(tag) => event.with_release_tag(tag),
            None => event,
        }
    }
}

impl Command {
    /// Subcommand name for messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Plan { .. } => "plan",
            Command::Run { .. } => "run",
            Command::CacheKey { .. } => "cache-key",
            Command::Checksums { .. } => "checksums",
            Command::Verify { .. } => "verify",
        }
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Run {
                trigger,
                release_tag,
                ..
            } => {
                if let Some(tag) = release_tag
                    && tag.trim().is_empty()
                {
                    return Err("--release-tag must not be empty".to_string());
                }
                if release_tag.is_some() && trigger.event != EventKind::ReleaseCreated {
                    return Err(format!(
                        "--release-tag only applies to release-created events, not {}",
                        trigger.event
                    ));
                }
            }
            Command::CacheKey { arch, .. } if arch.trim().is_empty() => {
                return Err("--arch must not be empty".to_string());
            }
            Command::Verify { platform, .. } if Platform::from_id(platform).is_none() => {
                return Err(format!(
                    "unknown platform '{}'; expected one of {}",
                    platform,
                    Platform::ALL.map(|p| p.id()).join(", ")
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl RuntimeConfig {
    /// Output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print only in verbose mode
    pub fn verbose_println(&self, message: &str) {
        let _ = self.output.verbose(message);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        let _ = self.output.success(message);
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        let _ = self.output.section(title);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }

    /// Whether verbose output is enabled
    pub fn is_verbose(&self) -> bool {
        self.output.is_verbose()
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}
