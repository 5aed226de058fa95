//! Signing credentials from the captured environment.

use crate::config::EnvConfig;
use crate::error::{ConfigError, Result};
use crate::matrix::{OsFamily, TargetDescriptor};
use crate::trigger::TriggerFlags;

/// Windows Authenticode certificate
#[derive(Clone)]
pub struct WindowsCredentials {
    /// Base64-encoded PFX blob
    pub certificate_base64: String,
    /// PFX password
    pub password: String,
}

/// macOS Developer ID identity and notary account
#[derive(Clone)]
pub struct MacosCredentials {
    /// Base64-encoded P12 blob
    pub certificate_base64: String,
    /// P12 password
    pub certificate_password: String,
    /// Installer signing identity, e.g. `Developer ID Installer: ...`
    pub signing_identity: String,
    /// Apple ID used for notarization
    pub apple_id: String,
    /// App-specific password
    pub apple_password: String,
    /// Team identifier
    pub team_id: String,
}

// Secrets never reach logs.
impl std::fmt::Debug for WindowsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsCredentials").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MacosCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacosCredentials")
            .field("signing_identity", &self.signing_identity)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

/// Credentials available to this run
#[derive(Debug, Clone, Default)]
pub struct SigningCredentials {
    /// Windows credentials, if every variable is set
    pub windows: Option<WindowsCredentials>,
    /// macOS credentials, if every variable is set
    pub macos: Option<MacosCredentials>,
    missing_windows: Option<&'static str>,
    missing_macos: Option<&'static str>,
}

const WINDOWS_VARS: [&str; 2] = ["WINDOWS_CERT_BASE64", "WINDOWS_CERT_PASSWORD"];
const MACOS_VARS: [&str; 6] = [
    "MACOS_CERTIFICATE",
    "MACOS_CERTIFICATE_PWD",
    "MACOS_SIGNING_IDENTITY",
    "APPLE_ID",
    "APPLE_PASSWORD",
    "APPLE_TEAM_ID",
];

impl SigningCredentials {
    /// Read credentials from the environment snapshot
    pub fn from_env(env: &EnvConfig) -> Self {
        let first_missing = |names: &[&'static str]| names.iter().copied().find(|n| env.get(n).is_none());
        let value = |name: &str| env.get(name).unwrap_or_default();

        let missing_windows = first_missing(&WINDOWS_VARS);
        let windows = missing_windows.is_none().then(|| WindowsCredentials {
            certificate_base64: value("WINDOWS_CERT_BASE64"),
            password: value("WINDOWS_CERT_PASSWORD"),
        });

        let missing_macos = first_missing(&MACOS_VARS);
        let macos = missing_macos.is_none().then(|| MacosCredentials {
            certificate_base64: value("MACOS_CERTIFICATE"),
            certificate_password: value("MACOS_CERTIFICATE_PWD"),
            signing_identity: value("MACOS_SIGNING_IDENTITY"),
            apple_id: value("APPLE_ID"),
            apple_password: value("APPLE_PASSWORD"),
            team_id: value("APPLE_TEAM_ID"),
        });

        Self {
            windows,
            macos,
            missing_windows,
            missing_macos,
        }
    }

    /// Fail before any job starts if a notarize-required run lacks credentials.
    ///
    /// Linux targets need nothing. A run that does not notarize needs nothing.
    pub fn ensure_available(&self, flags: &TriggerFlags, targets: &[TargetDescriptor]) -> Result<()> {
        if !flags.notarize {
            return Ok(());
        }

        for target in targets {
            let missing = match target.platform.family() {
                OsFamily::Windows => self.missing_windows,
                OsFamily::Macos => self.missing_macos,
                OsFamily::Linux => None,
            };
            if let Some(variable) = missing {
                return Err(ConfigError::MissingCredential {
                    platform: target.platform_id().to_string(),
                    variable: variable.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Platform;
    use crate::trigger::{EventKind, TriggerEvent, classify};

    fn windows_env() -> EnvConfig {
        EnvConfig::from_pairs([
            ("WINDOWS_CERT_BASE64", "MIIKcQIBAzCCCj8="),
            ("WINDOWS_CERT_PASSWORD", "hunter2"),
        ])
    }

    #[test]
    fn notarize_run_without_macos_credentials_is_config_error() {
        let credentials = SigningCredentials::from_env(&windows_env());
        let flags = classify(&TriggerEvent::new(EventKind::Scheduled));
        let targets = [
            TargetDescriptor::new(Platform::Windows),
            TargetDescriptor::new(Platform::MacosArm64),
        ];

        let err = credentials
            .ensure_available(&flags, &targets)
            .expect_err("macOS credentials missing");
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("MACOS_CERTIFICATE"));
        assert!(err.to_string().contains("macos-arm64"));
    }

    #[test]
    fn pull_requests_need_no_credentials() {
        let credentials = SigningCredentials::from_env(&EnvConfig::default());
        let flags = classify(&TriggerEvent::new(EventKind::PullRequest));
        let targets: Vec<_> = Platform::ALL.into_iter().map(TargetDescriptor::new).collect();
        assert!(credentials.ensure_available(&flags, &targets).is_ok());
    }

    #[test]
    fn linux_only_runs_need_no_credentials() {
        let credentials = SigningCredentials::from_env(&EnvConfig::default());
        let flags = classify(&TriggerEvent::new(EventKind::ReleaseCreated));
        let targets = [TargetDescriptor::new(Platform::Linux)];
        assert!(credentials.ensure_available(&flags, &targets).is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let credentials = SigningCredentials::from_env(&windows_env());
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("hunter2"));
        assert!(credentials.windows.is_some());
    }
}
