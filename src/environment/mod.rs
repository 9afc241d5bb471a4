//! Sandboxed command execution.
//!
//! An [`Environment`] runs one shell command at a time and reports its
//! combined output and exit code. [`StreamingEnvironment`] is the only
//! implementation shipped here: it runs commands through `docker exec`
//! against an already running container (or directly on the host when no
//! container is configured) and relays output while the command runs.

pub mod streaming;

pub use streaming::StreamingEnvironment;

use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExecutionError;

/// Default wall-clock timeout for a single command, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Exit code reported when a command was killed because it timed out.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Result of executing a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout and stderr, in the order the command wrote them.
    pub output: String,
    /// Exit code of the process, or [`TIMEOUT_EXIT_CODE`].
    pub returncode: i32,
    /// Whether the command was killed after exceeding its timeout.
    #[serde(skip)]
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Create a result for a command that ran to completion.
    pub fn completed(output: impl Into<String>, returncode: i32) -> Self {
        Self {
            output: output.into(),
            returncode,
            timed_out: false,
        }
    }

    /// Create a result for a command that was killed on timeout.
    pub fn timed_out(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            returncode: TIMEOUT_EXIT_CODE,
            timed_out: true,
        }
    }
}

/// Configuration for a command execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Container runtime CLI used for `exec` (e.g. "docker", "podman").
    pub executable: String,
    /// Id or name of a running container. Commands run on the host when unset.
    pub container_id: Option<String>,
    /// Default working directory for commands.
    pub cwd: String,
    /// Shell invocation the command string is appended to.
    pub shell: Vec<String>,
    /// Names of variables forwarded from the caller's environment when set.
    pub forward_env: Vec<String>,
    /// Static variables set for every command.
    pub env: BTreeMap<String, String>,
    /// Wall-clock timeout per command, in seconds.
    pub timeout: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            executable: "docker".to_string(),
            container_id: None,
            cwd: String::new(),
            shell: vec!["bash".to_string(), "-lc".to_string()],
            forward_env: Vec::new(),
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EnvironmentConfig {
    /// Create a configuration that runs commands on the host.
    pub fn local() -> Self {
        Self::default()
    }

    /// Create a configuration that runs commands inside a running container.
    pub fn container(container_id: impl Into<String>) -> Self {
        Self {
            container_id: Some(container_id.into()),
            ..Self::default()
        }
    }

    /// Set the default working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Set the per-command timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = timeout_secs;
        self
    }

    /// Set the shell invocation (e.g. `["sh", "-c"]`).
    pub fn with_shell<I, S>(mut self, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = shell.into_iter().map(Into::into).collect();
        self
    }

    /// Forward a variable from the caller's environment when it is set.
    pub fn with_forward_env(mut self, key: impl Into<String>) -> Self {
        self.forward_env.push(key.into());
        self
    }

    /// Add a static environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Forwarded variables present in the caller's environment, followed by
    /// the static overrides.
    pub fn resolved_env(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .forward_env
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }
}

/// Destination for command output relayed while a command is running.
pub trait OutputSink: Send + Sync {
    /// Called with each chunk of output as soon as it is read.
    fn chunk(&self, text: &str);

    /// Called with diagnostics about the execution itself (e.g. timeouts).
    fn diagnostic(&self, text: &str);
}

/// Relays output to the process stdout and diagnostics to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn chunk(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not fail the command.
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn diagnostic(&self, text: &str) {
        eprintln!("{}", text);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn chunk(&self, _text: &str) {}

    fn diagnostic(&self, _text: &str) {}
}

/// A sandboxed command runner.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Execute `command` in `cwd` (empty means the configured default).
    async fn execute(&self, command: &str, cwd: &str) -> Result<ExecutionResult, ExecutionError>;

    /// Configuration fields exposed to templates.
    fn template_vars(&self) -> Map<String, Value>;
}
