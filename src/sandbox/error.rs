//! Domain-specific error types for sandbox operations.
//!
//! Typed errors let the pool and its callers tell a broken deployment
//! apart from a submission that merely failed inside its sandbox.

use std::time::Duration;

/// Substring the container runtime prints when a named container is gone.
pub(crate) const NO_SUCH_CONTAINER: &str = "No such container";

/// Prefix the runtime CLI puts on errors reported by the daemon itself.
const DAEMON_PREFIX: &str = "Error response from daemon:";

/// Daemon error markers meaning the job never reached a live container.
const LOST_MARKERS: &[&str] = &[NO_SUCH_CONTAINER, "is not running"];

/// Errors that can occur during sandbox operations.
///
/// `Clone` because a single readiness check is shared by every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The container runtime is missing, unreachable, or cannot start the
    /// sandbox (for example the image does not exist).
    #[error("Sandbox environment is unavailable: {message}")]
    EnvironmentUnavailable { message: String },

    /// The job invocation exited non-zero, including when it was killed
    /// after exceeding its timeout.
    #[error("Sandbox execution failed: {message}")]
    ExecutionFailed { message: String },

    /// The named container no longer exists. Recovered inside
    /// [`Sandbox::run`](super::Sandbox::run) and never handed to the pool.
    #[error("Sandbox {name} no longer exists: {message}")]
    EnvironmentLost { name: String, message: String },
}

impl SandboxError {
    /// Creates an `EnvironmentUnavailable` error.
    pub fn environment_unavailable(message: impl Into<String>) -> Self {
        Self::EnvironmentUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ExecutionFailed` error.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    /// Creates an `EnvironmentLost` error.
    pub fn environment_lost(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EnvironmentLost {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates the `ExecutionFailed` error reported when the timer fires.
    pub fn timed_out(timeout: Duration) -> Self {
        Self::execution_failed(format!(
            "killed after exceeding the {} ms execution timeout",
            timeout.as_millis()
        ))
    }

    /// Classifies a non-zero exit of a job invocation.
    ///
    /// Empty stderr becomes a generic "nonzero exit" message.
    pub fn from_exit(name: &str, code: Option<i32>, stderr: &str) -> Self {
        let stderr = stderr.trim();
        if stderr.starts_with(DAEMON_PREFIX)
            && LOST_MARKERS.iter().any(|marker| stderr.contains(marker))
        {
            return Self::environment_lost(name, stderr);
        }
        if stderr.is_empty() {
            return match code {
                Some(code) => Self::execution_failed(format!("nonzero exit (code {code})")),
                None => Self::execution_failed("nonzero exit"),
            };
        }
        Self::execution_failed(stderr)
    }

    /// Downgrades `EnvironmentLost` to `ExecutionFailed` so it never leaks
    /// past the sandbox.
    #[must_use]
    pub fn into_surfaced(self) -> Self {
        match self {
            Self::EnvironmentLost { message, .. } => Self::ExecutionFailed { message },
            other => other,
        }
    }

    /// Returns true if the runtime reported the container as gone.
    pub fn is_environment_lost(&self) -> bool {
        matches!(self, Self::EnvironmentLost { .. })
    }

    /// Returns true if the job itself failed.
    pub fn is_execution_failed(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. })
    }

    /// Returns true if the runtime or image is the problem.
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(self, Self::EnvironmentUnavailable { .. })
    }
}
