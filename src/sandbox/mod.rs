//! Warm container sandboxes for isolated submission execution.
//!
//! Each [`Sandbox`] owns one long-lived container, keeps it running between
//! jobs and executes exactly one job at a time against it. The container
//! runtime itself sits behind [`ContainerRuntime`] so the lifecycle logic
//! does not depend on how containers are actually driven.

mod docker;
mod engine;
mod error;
mod instance;
#[cfg(test)]
pub(crate) mod mock;
mod network;

pub use docker::DockerCli;
pub use engine::DockerEngine;
pub use error::SandboxError;
pub use instance::{ResourceLimits, Sandbox, SandboxIdentity};
#[cfg(test)]
pub(crate) use instance::tests::identity as test_identity;
pub use network::NetworkPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How sandbox containers are driven.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Driver {
    /// Spawn the runtime binary for every operation
    #[default]
    Cli,
    /// Talk to the Docker Engine API on the local socket
    Api,
}

impl Driver {
    /// Builds the runtime this driver selects.
    pub fn connect(self) -> Result<Arc<dyn ContainerRuntime>, SandboxError> {
        match self {
            Self::Cli => Ok(Arc::new(DockerCli::new())),
            Self::Api => Ok(Arc::new(DockerEngine::connect()?)),
        }
    }
}

/// Captured result of one job invocation inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Returns true if the invocation exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Operations a container runtime must provide to back a [`Sandbox`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Reports whether a container with the sandbox's name is running.
    async fn is_running(&self, sandbox: &SandboxIdentity) -> Result<bool, SandboxError>;

    /// Force-removes the sandbox's container.
    ///
    /// Returns `EnvironmentLost` if no such container exists.
    async fn remove(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError>;

    /// Names of all containers, running or not, whose name starts with
    /// `prefix`. `runtime` is the configured runtime binary.
    async fn list(&self, runtime: &str, prefix: &str) -> Result<Vec<String>, SandboxError>;

    /// Creates and starts a detached container running the idle command.
    async fn create(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError>;

    /// Runs the job command with `payload` on stdin and collects its output.
    ///
    /// Dropping the returned future must kill the invocation.
    async fn exec(&self, sandbox: &SandboxIdentity, payload: &[u8])
        -> Result<ExecOutput, SandboxError>;
}
