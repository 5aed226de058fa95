//! Trigger classification.
//!
//! Maps an inbound event to the pipeline-wide [`TriggerFlags`]. The flags are
//! computed once per run and passed by value to every component.

use crate::error::{ConfigError, PipelineError};
use crate::matrix::PlatformToggles;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of event that started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Scheduled timer run against the mainline branch
    Scheduled,
    /// Pull request touching the installer paths
    PullRequest,
    /// A release record was created
    ReleaseCreated,
    /// Operator-invoked run with explicit toggles
    Manual,
}

impl EventKind {
    /// All event kinds
    pub const ALL: [EventKind; 4] = [
        EventKind::Scheduled,
        EventKind::PullRequest,
        EventKind::ReleaseCreated,
        EventKind::Manual,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Scheduled => "scheduled",
            EventKind::PullRequest => "pull-request",
            EventKind::ReleaseCreated => "release-created",
            EventKind::Manual => "manual",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = PipelineError;

    /// Accepts the canonical names and the GitHub Actions event names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "schedule" => Ok(EventKind::Scheduled),
            "pull-request" | "pull_request" => Ok(EventKind::PullRequest),
            "release-created" | "release" => Ok(EventKind::ReleaseCreated),
            "manual" | "workflow_dispatch" => Ok(EventKind::Manual),
            _ => Err(ConfigError::UnknownTrigger {
                kind: s.to_string(),
            }
            .into()),
        }
    }
}

/// Operator overrides. Only meaningful for manual runs, except the
/// platform toggles which every event honors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualOverrides {
    /// Build a pre-release (defaults to true for manual runs)
    pub pre_release: Option<bool>,
    /// Open a debug session on failure (defaults to false)
    pub debug_access: Option<bool>,
    /// Per-platform enable toggles
    pub platforms: PlatformToggles,
}

/// An inbound trigger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Event kind
    pub kind: EventKind,
    /// Operator overrides
    pub overrides: ManualOverrides,
    /// Release record the event refers to (release-created only)
    pub release_tag: Option<String>,
}

impl TriggerEvent {
    /// Event with no overrides
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            overrides: ManualOverrides::default(),
            release_tag: None,
        }
    }

    /// Attach operator overrides
    pub fn with_overrides(mut self, overrides: ManualOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Attach the release tag
    pub fn with_release_tag(mut self, tag: impl Into<String>) -> Self {
        self.release_tag = Some(tag.into());
        self
    }
}

/// Pipeline-wide flags. Immutable once derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFlags {
    /// Publish assets to the release record
    pub release: bool,
    /// Build a pre-release
    pub pre_release: bool,
    /// Debug session access
    pub debug_access: bool,
    /// Restore subcomponents from cache instead of building them
    pub use_cached_subcomponents: bool,
    /// Sign and notarize installers
    pub notarize: bool,
}

/// Derive [`TriggerFlags`] from an event. Total over [`EventKind`].
pub fn classify(event: &TriggerEvent) -> TriggerFlags {
    let flags = match event.kind {
        EventKind::Scheduled => TriggerFlags {
            release: false,
            pre_release: false,
            debug_access: false,
            use_cached_subcomponents: true,
            notarize: true,
        },
        EventKind::ReleaseCreated => TriggerFlags {
            release: true,
            pre_release: false,
            debug_access: false,
            use_cached_subcomponents: false,
            notarize: true,
        },
        EventKind::PullRequest => TriggerFlags {
            release: false,
            pre_release: false,
            debug_access: false,
            use_cached_subcomponents: true,
            notarize: false,
        },
        EventKind::Manual => {
            let pre_release = event.overrides.pre_release.unwrap_or(true);
            TriggerFlags {
                release: false,
                pre_release,
                debug_access: event.overrides.debug_access.unwrap_or(false),
                use_cached_subcomponents: !pre_release,
                notarize: pre_release,
            }
        }
    };

    log::debug!("Classified {} trigger as {:?}", event.kind, flags);
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_uses_cache_and_notarizes() {
        let flags = classify(&TriggerEvent::new(EventKind::Scheduled));
        assert!(!flags.release);
        assert!(!flags.pre_release);
        assert!(flags.use_cached_subcomponents);
        assert!(flags.notarize);
    }

    #[test]
    fn release_builds_from_source_and_notarizes() {
        let flags = classify(&TriggerEvent::new(EventKind::ReleaseCreated));
        assert!(flags.release);
        assert!(!flags.use_cached_subcomponents);
        assert!(flags.notarize);
    }

    #[test]
    fn pull_request_skips_notarization() {
        let flags = classify(&TriggerEvent::new(EventKind::PullRequest));
        assert!(!flags.release);
        assert!(flags.use_cached_subcomponents);
        assert!(!flags.notarize);
    }

    #[test]
    fn manual_defaults_to_pre_release() {
        let flags = classify(&TriggerEvent::new(EventKind::Manual));
        assert!(flags.pre_release);
        assert!(!flags.use_cached_subcomponents);
        assert!(flags.notarize);
        assert!(!flags.debug_access);
    }

    #[test]
    fn manual_without_pre_release_uses_cache() {
        let event = TriggerEvent::new(EventKind::Manual).with_overrides(ManualOverrides {
            pre_release: Some(false),
            debug_access: Some(true),
            ..ManualOverrides::default()
        });
        let flags = classify(&event);
        assert!(!flags.pre_release);
        assert!(flags.use_cached_subcomponents);
        assert!(!flags.notarize);
        assert!(flags.debug_access);
    }

    #[test]
    fn overrides_are_ignored_for_non_manual_events() {
        let event = TriggerEvent::new(EventKind::PullRequest).with_overrides(ManualOverrides {
            pre_release: Some(true),
            debug_access: Some(true),
            ..ManualOverrides::default()
        });
        let flags = classify(&event);
        assert!(!flags.pre_release);
        assert!(!flags.debug_access);
    }

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.as_str().parse().expect("canonical name parses");
            assert_eq!(parsed, kind);
        }
        assert_eq!("workflow_dispatch".parse::<EventKind>().ok(), Some(EventKind::Manual));
        assert_eq!("schedule".parse::<EventKind>().ok(), Some(EventKind::Scheduled));
    }

    #[test]
    fn unknown_kind_is_a_configuration_error() {
        let err = "push".parse::<EventKind>().expect_err("push is not a trigger");
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::UnknownTrigger { ref kind }) if kind == "push"
        ));
    }
}
