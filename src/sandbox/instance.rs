//! A single warm sandbox: readiness, execution and self-healing.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ContainerRuntime, NetworkPolicy, SandboxError};

/// Resource limits applied when the sandbox container is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory limit passed through verbatim (e.g., "512m")
    pub memory: Option<String>,
    /// CPU limit passed through verbatim (e.g., "1.5")
    pub cpus: Option<String>,
    pub network: NetworkPolicy,
}

/// Immutable description of one pool slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxIdentity {
    /// Container runtime binary (e.g., "docker", "/usr/bin/podman")
    pub runtime: String,
    pub image: String,
    /// Unique container name
    pub name: String,
    /// Keep-alive command the container runs between jobs
    pub idle_command: Vec<String>,
    /// Command executed once per job, reading the payload from stdin
    pub run_command: Vec<String>,
    /// Hard wall-clock limit for one job
    pub timeout: Duration,
    pub limits: ResourceLimits,
}

type ReadyCheck = Shared<BoxFuture<'static, Result<(), SandboxError>>>;

/// One persistent container plus the logic to keep it warm.
pub struct Sandbox {
    identity: Arc<SandboxIdentity>,
    runtime: Arc<dyn ContainerRuntime>,
    /// Readiness check currently in flight, shared by concurrent callers
    in_flight: Mutex<Option<ReadyCheck>>,
    /// Held for the whole of a job so runs never overlap
    exclusive: tokio::sync::Mutex<()>,
}

impl Sandbox {
    pub fn new(identity: SandboxIdentity, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            identity: Arc::new(identity),
            runtime,
            in_flight: Mutex::new(None),
            exclusive: tokio::sync::Mutex::new(()),
        }
    }

    /// Container name of this sandbox.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Makes sure the container is running, recreating it if it is not.
    ///
    /// Overlapping calls attach to the check already in flight, so the
    /// runtime sees a single probe and at most one create. The handle is
    /// cleared once the check settles and the next call starts fresh.
    pub async fn ensure_ready(&self) -> Result<(), SandboxError> {
        let check = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let check =
                    check_and_repair(Arc::clone(&self.identity), Arc::clone(&self.runtime))
                        .boxed()
                        .shared();
                *slot = Some(check.clone());
                check
            }
        };

        let result = check.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&check)) {
            *slot = None;
        }

        result
    }

    /// Runs one job against the container, enforcing the timeout.
    ///
    /// Assumes the container is ready. Dropping the exec future on timeout
    /// kills the invocation.
    pub async fn execute(&self, payload: &[u8]) -> Result<String, SandboxError> {
        let timeout = self.identity.timeout;
        let output =
            match tokio::time::timeout(timeout, self.runtime.exec(&self.identity, payload)).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(sandbox = %self.identity.name, timeout_ms = %timeout.as_millis(), "Job timed out, invocation killed");
                    return Err(SandboxError::timed_out(timeout));
                }
            };

        if output.success() {
            debug!(sandbox = %self.identity.name, bytes = output.stdout.len(), "Job completed");
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SandboxError::from_exit(&self.identity.name, output.code, &stderr))
    }

    /// Ensures readiness, then executes the job.
    ///
    /// If the container vanished since the last check, it is recreated and
    /// the job retried exactly once. Any other failure, or a failure of the
    /// retry, is returned as is.
    pub async fn run(&self, payload: &[u8]) -> Result<String, SandboxError> {
        let _guard = self.exclusive.lock().await;

        self.ensure_ready().await?;
        match self.execute(payload).await {
            Err(err) if err.is_environment_lost() => {
                warn!(sandbox = %self.identity.name, "Sandbox disappeared, recreating and retrying once");
                self.ensure_ready().await?;
                self.execute(payload).await.map_err(SandboxError::into_surfaced)
            }
            other => other,
        }
    }

    /// Force-removes the container. Errors are logged and swallowed.
    pub async fn dispose(&self) {
        match self.runtime.remove(&self.identity).await {
            Ok(()) => info!(sandbox = %self.identity.name, "Sandbox removed"),
            Err(err) if err.is_environment_lost() => {
                debug!(sandbox = %self.identity.name, "Sandbox already gone");
            }
            Err(err) => debug!(sandbox = %self.identity.name, "Ignoring dispose failure: {err}"),
        }
    }
}

async fn check_and_repair(
    identity: Arc<SandboxIdentity>,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<(), SandboxError> {
    if runtime.is_running(&identity).await? {
        debug!(sandbox = %identity.name, "Sandbox is running");
        return Ok(());
    }

    info!(sandbox = %identity.name, image = %identity.image, "Starting sandbox container");
    match runtime.remove(&identity).await {
        Ok(()) => debug!(sandbox = %identity.name, "Removed stale container"),
        Err(err) if err.is_environment_lost() => {}
        Err(err) => return Err(err),
    }
    runtime.create(&identity).await
}
