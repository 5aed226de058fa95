//! Build matrix resolution.
//!
//! Turns platform toggles and the trigger kind into an ordered list of
//! [`TargetDescriptor`]s and a [`BranchSelection`]. Their cross product is the
//! set of [`BuildJob`]s.

use crate::config::PipelineConfig;
use crate::trigger::{EventKind, TriggerFlags};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported installer platforms, in stable build order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    /// macOS on Intel
    MacosX86_64,
    /// macOS on Apple silicon
    MacosArm64,
    /// Linux x86_64
    Linux,
    /// Windows x86_64
    Windows,
}

/// Operating system family of a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    /// macOS
    Macos,
    /// Linux
    Linux,
    /// Windows
    Windows,
}

impl Platform {
    /// All platforms in the order jobs are created
    pub const ALL: [Platform; 4] = [
        Platform::MacosX86_64,
        Platform::MacosArm64,
        Platform::Linux,
        Platform::Windows,
    ];

    /// Unique platform identifier
    pub fn id(&self) -> &'static str {
        match self {
            Platform::MacosX86_64 => "macos-x86_64",
            Platform::MacosArm64 => "macos-arm64",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }

    /// Parse a platform identifier
    pub fn from_id(id: &str) -> Option<Platform> {
        Platform::ALL.into_iter().find(|p| p.id() == id)
    }

    /// Default runner class
    pub fn default_runner(&self) -> &'static str {
        match self {
            Platform::MacosX86_64 => "macos-13",
            Platform::MacosArm64 => "macos-14",
            Platform::Linux => "ubuntu-latest",
            Platform::Windows => "windows-latest",
        }
    }

    /// Default architecture tag
    pub fn default_arch(&self) -> &'static str {
        match self {
            Platform::MacosX86_64 => "osx-64",
            Platform::MacosArm64 => "osx-arm64",
            Platform::Linux => "linux-64",
            Platform::Windows => "win-64",
        }
    }

    /// Operating system family
    pub fn family(&self) -> OsFamily {
        match self {
            Platform::MacosX86_64 | Platform::MacosArm64 => OsFamily::Macos,
            Platform::Linux => OsFamily::Linux,
            Platform::Windows => OsFamily::Windows,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-platform enable toggles. `None` means enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformToggles {
    /// macOS Intel
    pub macos_x86_64: Option<bool>,
    /// macOS Apple silicon
    pub macos_arm64: Option<bool>,
    /// Linux
    pub linux: Option<bool>,
    /// Windows
    pub windows: Option<bool>,
}

impl PlatformToggles {
    /// Every platform explicitly disabled
    pub fn none() -> Self {
        Self {
            macos_x86_64: Some(false),
            macos_arm64: Some(false),
            linux: Some(false),
            windows: Some(false),
        }
    }

    /// Whether the platform is enabled
    pub fn is_enabled(&self, platform: Platform) -> bool {
        let toggle = match platform {
            Platform::MacosX86_64 => self.macos_x86_64,
            Platform::MacosArm64 => self.macos_arm64,
            Platform::Linux => self.linux,
            Platform::Windows => self.windows,
        };
        toggle.unwrap_or(true)
    }
}

/// One resolved build target. Identity is the platform id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Platform
    pub platform: Platform,
    /// Runner class the job is scheduled on
    pub runner_class: String,
    /// Architecture tag
    pub arch_tag: String,
    /// Whether the target is Windows
    pub is_windows: bool,
}

impl TargetDescriptor {
    /// Descriptor with the platform's default runner and arch
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            runner_class: platform.default_runner().to_string(),
            arch_tag: platform.default_arch().to_string(),
            is_windows: platform == Platform::Windows,
        }
    }

    /// Unique platform identifier
    pub fn platform_id(&self) -> &'static str {
        self.platform.id()
    }
}

/// Source branch a job builds against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Branch {
    /// The triggering checkout
    Current,
    /// A named branch, checked out separately
    Named(String),
}

impl Branch {
    /// Branch name, empty for the current checkout
    pub fn name(&self) -> &str {
        match self {
            Branch::Current => "",
            Branch::Named(name) => name,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Current => f.write_str("(current checkout)"),
            Branch::Named(name) => f.write_str(name),
        }
    }
}

/// Ordered, duplicate-free set of branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSelection(Vec<Branch>);

impl BranchSelection {
    /// Selection containing only the triggering checkout
    pub fn current() -> Self {
        Self(vec![Branch::Current])
    }

    /// Build a selection, dropping duplicates while preserving order
    pub fn from_branches(branches: impl IntoIterator<Item = Branch>) -> Self {
        let mut unique: Vec<Branch> = Vec::new();
        for branch in branches {
            if !unique.contains(&branch) {
                unique.push(branch);
            }
        }
        Self(unique)
    }

    /// Branches in order
    pub fn branches(&self) -> &[Branch] {
        &self.0
    }
}

/// Identifier of a build job: `<platform>` or `<platform>@<branch>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    fn for_target(target: &TargetDescriptor, branch: &Branch) -> Self {
        match branch {
            Branch::Current => Self(target.platform_id().to_string()),
            Branch::Named(name) => Self(format!("{}@{}", target.platform_id(), name)),
        }
    }

    /// Identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier usable as a directory name
    pub fn dir_name(&self) -> String {
        self.0.replace(['@', '/', '\\'], "_")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of parallel work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    /// Job identifier
    pub id: JobId,
    /// Target
    pub target: TargetDescriptor,
    /// Source branch
    pub branch: Branch,
    /// Pipeline-wide flags
    pub flags: TriggerFlags,
}

/// Resolved targets and branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMatrix {
    /// Targets in stable order
    pub targets: Vec<TargetDescriptor>,
    /// Branch selection
    pub branches: BranchSelection,
}

impl BuildMatrix {
    /// Whether the matrix resolves to no jobs
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() || self.branches.branches().is_empty()
    }

    /// Cross product of branches and targets
    pub fn jobs(&self, flags: TriggerFlags) -> Vec<BuildJob> {
        self.branches
            .branches()
            .iter()
            .flat_map(|branch| {
                self.targets.iter().map(move |target| BuildJob {
                    id: JobId::for_target(target, branch),
                    target: target.clone(),
                    branch: branch.clone(),
                    flags,
                })
            })
            .collect()
    }

    /// Distinct architecture tags among the targets, in target order
    pub fn arch_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = Vec::new();
        for target in &self.targets {
            if !tags.contains(&target.arch_tag.as_str()) {
                tags.push(target.arch_tag.as_str());
            }
        }
        tags
    }
}

/// Descriptor for `platform` with any configured runner and arch overrides
pub fn target_for(platform: Platform, config: &PipelineConfig) -> TargetDescriptor {
    let mut target = TargetDescriptor::new(platform);
    if let Some(overrides) = config.targets.get(platform.id()) {
        if let Some(runner) = &overrides.runner {
            target.runner_class = runner.clone();
        }
        if let Some(arch) = &overrides.arch {
            target.arch_tag = arch.clone();
        }
    }
    target
}

/// Resolve the build matrix.
///
/// Scheduled runs build the configured mainline branch; every other event
/// builds the triggering checkout. An empty target list is valid.
pub fn resolve(kind: EventKind, toggles: &PlatformToggles, config: &PipelineConfig) -> BuildMatrix {
    let targets: Vec<TargetDescriptor> = Platform::ALL
        .into_iter()
        .filter(|platform| toggles.is_enabled(*platform))
        .map(|platform| target_for(platform, config))
        .collect();

    let branches = match kind {
        EventKind::Scheduled => {
            BranchSelection::from_branches([Branch::Named(config.mainline_branch.clone())])
        }
        _ => BranchSelection::current(),
    };

    if targets.is_empty() {
        log::info!("All platforms disabled; the run is a no-op");
    }

    BuildMatrix { targets, branches }
}
