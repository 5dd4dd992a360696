//! Errors surfaced by the sandbox pool.

use uuid::Uuid;

use crate::sandbox::SandboxError;

/// Errors returned by [`Pool`](super::Pool) and its job handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool was constructed without any sandboxes.
    #[error("Pool is misconfigured: {message}")]
    PoolMisconfigured { message: String },

    /// The sandbox could not run the job.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The job's result slot was dropped before it resolved.
    #[error("Job {id} was abandoned before it resolved")]
    Abandoned { id: Uuid },
}

impl PoolError {
    /// Creates a `PoolMisconfigured` error.
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::PoolMisconfigured {
            message: message.into(),
        }
    }

    /// Returns true if the pool could never have run anything.
    pub fn is_misconfigured(&self) -> bool {
        matches!(self, Self::PoolMisconfigured { .. })
    }

    /// Returns the underlying sandbox error, if any.
    pub fn as_sandbox(&self) -> Option<&SandboxError> {
        match self {
            Self::Sandbox(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misconfigured_error() {
        let err = PoolError::misconfigured("pool size must be at least 1");
        assert!(err.is_misconfigured());
        assert_eq!(
            err.to_string(),
            "Pool is misconfigured: pool size must be at least 1"
        );
    }

    #[test]
    fn test_sandbox_error_is_transparent() {
        let err = PoolError::from(SandboxError::execution_failed("boom"));
        assert_eq!(err.to_string(), "Sandbox execution failed: boom");
        assert_eq!(
            err.as_sandbox(),
            Some(&SandboxError::execution_failed("boom"))
        );
        assert!(!err.is_misconfigured());
    }
}
