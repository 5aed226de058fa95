//! External command templates and execution.
//!
//! Collaborator tools (installer builder, signing tools, notarization client,
//! installers under test) are spawned through [`run_command`]. Children are
//! killed when their future is dropped, so cancelling a job never leaves a
//! build or an installer running in the background.

use crate::error::{CliError, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// A command line with `{placeholder}` substitution
///
/// ```toml
/// build_installer = { program = "python", args = ["build_installers.py", "--arch", "{arch}"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Program to execute (placeholders allowed)
    pub program: String,
    /// Arguments (placeholders allowed)
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    /// Create a template from a program and arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitute placeholders, producing a concrete invocation
    pub fn render(&self, values: &Placeholders) -> Invocation {
        Invocation {
            program: values.substitute(&self.program),
            args: self.args.iter().map(|a| values.substitute(a)).collect(),
            cwd: None,
            envs: BTreeMap::new(),
            timeout: None,
        }
    }
}

/// Placeholder values for [`CommandTemplate::render`]
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    /// Empty placeholder set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a placeholder value
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    /// Add a path-valued placeholder
    pub fn with_path(self, name: &'static str, value: &Path) -> Self {
        self.with(name, value.display().to_string())
    }

    /// Single left-to-right pass: text inserted for one placeholder is never
    /// scanned again, so values may contain literal `{name}` tokens.
    fn substitute(&self, input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find('{') {
            output.push_str(&rest[..open]);
            let tail = &rest[open..];
            let known = tail[1..]
                .find('}')
                .and_then(|close| {
                    self.values
                        .get(&tail[1..=close])
                        .map(|value| (value, close + 2))
                });
            match known {
                Some((value, consumed)) => {
                    output.push_str(value);
                    rest = &tail[consumed..];
                }
                None => {
                    output.push('{');
                    rest = &tail[1..];
                }
            }
        }
        output.push_str(rest);
        output
    }
}

/// A fully rendered command ready to spawn
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the child only
    pub envs: BTreeMap<String, String>,
    /// Kill the child after this long
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Build an invocation directly
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandTemplate::new(program, args).render(&Placeholders::new())
    }

    /// Run in the given directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Pass environment variables to the child
    pub fn envs(mut self, envs: &BTreeMap<String, String>) -> Self {
        self.envs.extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Bound the child's run time
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Short display form for logs and errors
    pub fn display(&self) -> String {
        let program = Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone());
        match self.args.first() {
            Some(first) => format!("{} {}", program, first),
            None => program,
        }
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Failure reason suitable for error messages
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() { self.stdout.trim() } else { stderr };
        format!("exit code {:?}: {}", self.code, detail)
    }
}

/// Spawn a command and capture its output.
///
/// A non-zero exit is not an error here; callers map it to their own
/// domain error with [`CommandOutput::failure_reason`].
pub async fn run_command(invocation: &Invocation) -> Result<CommandOutput> {
    log::debug!("Running {} {:?}", invocation.program, invocation.args);

    let mut command = tokio::process::Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(&invocation.envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }

    let child = command.spawn().map_err(|e| {
        PipelineError::Cli(CliError::ExecutionFailed {
            command: invocation.display(),
            reason: e.to_string(),
        })
    })?;

    let output = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(PipelineError::Timeout {
                    operation: invocation.display(),
                    seconds: limit.as_secs_f64(),
                });
            }
        },
        None => child.wait_with_output().await?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stderr.is_empty() {
        log::debug!("{} stderr:\n{}", invocation.display(), stderr);
    }

    Ok(CommandOutput {
        code: output.status.code(),
        stdout,
        stderr,
    })
}
