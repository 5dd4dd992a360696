//! Container runtime backed by the Docker Engine API.
//!
//! Talks to the local daemon socket instead of spawning the CLI for every
//! operation. An exec that is dropped before it finishes cannot be signalled
//! through the API, so the whole container is killed instead and the next
//! readiness check recreates it.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    KillContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::service::{ContainerSummary, ExecInspectResponse, HostConfig};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ContainerRuntime, ExecOutput, NetworkPolicy, SandboxError, SandboxIdentity};

/// How often, and how many times, a finished exec is re-inspected while the
/// daemon has not recorded its exit yet.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const EXIT_POLL_ATTEMPTS: usize = 50;

/// Runs sandbox containers through the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local daemon (socket or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|err| {
            SandboxError::environment_unavailable(format!(
                "failed to connect to Docker. Is Docker running? {err}"
            ))
        })?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn is_running(&self, sandbox: &SandboxIdentity) -> Result<bool, SandboxError> {
        match self
            .docker
            .inspect_container(&sandbox.name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(err) if status_code(&err) == Some(404) => Ok(false),
            Err(err) => Err(SandboxError::environment_unavailable(err.to_string())),
        }
    }

    async fn remove(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&sandbox.name, Some(options))
            .await
            .map_err(|err| classify(&sandbox.name, &err))
    }

    async fn list(&self, _runtime: &str, prefix: &str) -> Result<Vec<String>, SandboxError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("name".to_string(), vec![format!("^{prefix}")])]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|err| SandboxError::environment_unavailable(err.to_string()))?;
        Ok(summary_names(&containers, prefix))
    }

    async fn create(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        let config = container_config(sandbox)?;
        let options = CreateContainerOptions {
            name: sandbox.name.clone(),
            platform: None,
        };

        let started = async {
            self.docker.create_container(Some(options), config).await?;
            self.docker
                .start_container::<String>(&sandbox.name, None)
                .await
        };
        started.await.map_err(|err| {
            warn!(sandbox = %sandbox.name, "Failed to start sandbox container: {err}");
            SandboxError::environment_unavailable(format!(
                "failed to start {} from {}: {err}",
                sandbox.name, sandbox.image
            ))
        })
    }

    async fn exec(
        &self,
        sandbox: &SandboxIdentity,
        payload: &[u8],
    ) -> Result<ExecOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &sandbox.name,
                CreateExecOptions {
                    cmd: Some(sandbox.run_command.clone()),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| classify(&sandbox.name, &err))?;

        let mut guard = KillOnDrop::new(self.docker.clone(), &sandbox.name);

        let (mut stream, mut stdin) = match self.docker.start_exec(&exec.id, None).await {
            Ok(StartExecResults::Attached { output, input }) => (output, input),
            Ok(StartExecResults::Detached) => {
                guard.disarm();
                return Err(SandboxError::execution_failed("exec started detached"));
            }
            Err(err) => {
                guard.disarm();
                return Err(classify(&sandbox.name, &err));
            }
        };

        let write = async move {
            stdin.write_all(payload).await?;
            stdin.shutdown().await
        };

        let read = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(err) => warn!(sandbox = %sandbox.name, "Error reading exec output: {err}"),
                }
            }
            (stdout, stderr)
        };

        let (written, (stdout, stderr)) = tokio::join!(write, read);
        if let Err(err) = written {
            debug!(sandbox = %sandbox.name, "Payload write interrupted: {err}");
        }

        let (docker, exec_id, name) = (&self.docker, exec.id.as_str(), sandbox.name.as_str());
        let inspect = wait_for_exit(|| async move {
            docker
                .inspect_exec(exec_id)
                .await
                .map_err(|err| classify(name, &err))
        })
        .await;
        guard.disarm();

        let code = inspect?
            .exit_code
            .map(|code| i32::try_from(code).unwrap_or(i32::MAX));
        Ok(ExecOutput {
            code,
            stdout,
            stderr,
        })
    }
}

/// Re-inspects an exec until the daemon reports it stopped.
///
/// The attach stream can close before the exit code is recorded; after the
/// last attempt the latest inspection is returned as is.
async fn wait_for_exit<F, Fut>(mut inspect: F) -> Result<ExecInspectResponse, SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExecInspectResponse, SandboxError>>,
{
    let mut latest = inspect().await?;
    for _ in 1..EXIT_POLL_ATTEMPTS {
        if latest.running != Some(true) && latest.exit_code.is_some() {
            break;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        latest = inspect().await?;
    }
    Ok(latest)
}

/// Container names without the leading slash, filtered to `prefix`.
fn summary_names(containers: &[ContainerSummary], prefix: &str) -> Vec<String> {
    containers
        .iter()
        .filter_map(|container| container.names.as_ref())
        .flatten()
        .map(|name| name.trim_start_matches('/'))
        .filter(|name| name.starts_with(prefix))
        .map(ToString::to_string)
        .collect()
}

/// Kills the container if an exec is abandoned midway.
struct KillOnDrop {
    docker: Option<Docker>,
    name: String,
}

impl KillOnDrop {
    fn new(docker: Docker, name: &str) -> Self {
        Self {
            docker: Some(docker),
            name: name.to_string(),
        }
    }

    fn disarm(&mut self) {
        self.docker = None;
    }
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let Some(docker) = self.docker.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        warn!(sandbox = %name, "Exec abandoned, killing sandbox container");
        handle.spawn(async move {
            let options = KillContainerOptions { signal: "SIGKILL" };
            if let Err(err) = docker.kill_container(&name, Some(options)).await {
                debug!(sandbox = %name, "Kill after abandoned exec failed: {err}");
            }
        });
    }
}

fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Missing or stopped containers are lost; everything else is unavailable.
fn classify(name: &str, err: &DockerError) -> SandboxError {
    let message = err.to_string();
    match status_code(err) {
        Some(404) => SandboxError::environment_lost(name, message),
        Some(409) if message.contains("is not running") => {
            SandboxError::environment_lost(name, message)
        }
        _ => SandboxError::environment_unavailable(message),
    }
}

fn container_config(sandbox: &SandboxIdentity) -> Result<ContainerConfig<String>, SandboxError> {
    let limits = &sandbox.limits;
    let memory = limits.memory.as_deref().map(parse_memory_limit).transpose()?;
    let nano_cpus = limits.cpus.as_deref().map(parse_nano_cpus).transpose()?;
    let network_mode = match limits.network {
        NetworkPolicy::Deny => Some("none".to_string()),
        NetworkPolicy::AllowAll => None,
    };

    Ok(ContainerConfig {
        image: Some(sandbox.image.clone()),
        cmd: Some(sandbox.idle_command.clone()),
        host_config: Some(HostConfig {
            memory,
            nano_cpus,
            network_mode,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64, SandboxError> {
    let limit = limit.trim().to_lowercase();
    let invalid = || SandboxError::environment_unavailable(format!("invalid memory limit: {limit}"));

    let (digits, unit) = match limit.char_indices().last() {
        Some((i, 'g')) => (&limit[..i], 1024 * 1024 * 1024),
        Some((i, 'm')) => (&limit[..i], 1024 * 1024),
        Some((i, 'k')) => (&limit[..i], 1024),
        _ => (limit.as_str(), 1),
    };
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(unit).ok_or_else(invalid)
}

/// Parse a CPU count (e.g., "1.5") to nano-CPUs
#[allow(clippy::cast_possible_truncation)]
fn parse_nano_cpus(cpus: &str) -> Result<i64, SandboxError> {
    let invalid = || SandboxError::environment_unavailable(format!("invalid cpu limit: {cpus}"));
    let value: f64 = cpus.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid());
    }
    Ok((value * 1_000_000_000.0).round() as i64)
}
