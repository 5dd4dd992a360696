//! Container runtime driven through the `docker` (or compatible) CLI.
//!
//! Every operation is a subprocess call against the configured binary:
//! ```bash
//! docker inspect -f '{{.State.Running}}' <name>
//! docker rm -f <name>
//! docker ps -a --filter name=^<prefix> --format '{{.Names}}'
//! docker run -d --name <name> [limits] <image> <idle command...>
//! docker exec -i <name> <run command...>   # payload on stdin
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::NO_SUCH_CONTAINER;
use super::{ContainerRuntime, ExecOutput, SandboxError, SandboxIdentity};

/// Stderr marker of `inspect` for an unknown name.
const NO_SUCH_OBJECT: &str = "No such object";

/// Runs sandbox containers via the container runtime CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    /// Runs a short management command to completion.
    async fn output(runtime: &str, args: &[String]) -> Result<Output, SandboxError> {
        debug!("{runtime} {}", args.join(" "));
        Command::new(runtime)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| spawn_error(runtime, &err))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_running(&self, sandbox: &SandboxIdentity) -> Result<bool, SandboxError> {
        let output = Self::output(&sandbox.runtime, &inspect_args(sandbox)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim() == "true");
        }
        if is_missing(&stderr) {
            return Ok(false);
        }
        Err(SandboxError::environment_unavailable(stderr.trim()))
    }

    async fn remove(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        let output = Self::output(&sandbox.runtime, &remove_args(sandbox)).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            return Err(SandboxError::environment_lost(&sandbox.name, stderr.trim()));
        }
        Err(SandboxError::environment_unavailable(stderr.trim()))
    }

    async fn list(&self, runtime: &str, prefix: &str) -> Result<Vec<String>, SandboxError> {
        let output = Self::output(runtime, &list_args(prefix)).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::environment_unavailable(stderr.trim()));
        }
        Ok(parse_names(&String::from_utf8_lossy(&output.stdout), prefix))
    }

    async fn create(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        let output = Self::output(&sandbox.runtime, &create_args(sandbox)).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(sandbox = %sandbox.name, "Failed to start sandbox container: {}", stderr.trim());
        Err(SandboxError::environment_unavailable(format!(
            "failed to start {} from {}: {}",
            sandbox.name,
            sandbox.image,
            stderr.trim()
        )))
    }

    async fn exec(
        &self,
        sandbox: &SandboxIdentity,
        payload: &[u8],
    ) -> Result<ExecOutput, SandboxError> {
        let mut child = Command::new(&sandbox.runtime)
            .args(exec_args(sandbox))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(&sandbox.runtime, &err))?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        // Feed stdin while draining stdout/stderr so a chatty job can't
        // deadlock on a full pipe.
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|err| {
            SandboxError::execution_failed(format!("failed to collect job output: {err}"))
        })?;
        if let Err(err) = written {
            // The job may exit before reading all of stdin; its exit status decides.
            debug!(sandbox = %sandbox.name, "Payload write interrupted: {err}");
        }

        Ok(ExecOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn spawn_error(runtime: &str, err: &std::io::Error) -> SandboxError {
    if err.kind() == ErrorKind::NotFound {
        SandboxError::environment_unavailable(format!(
            "container runtime '{runtime}' not found. Install Docker or set [sandbox] runtime in runner.toml"
        ))
    } else {
        SandboxError::environment_unavailable(format!("failed to run '{runtime}': {err}"))
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains(NO_SUCH_CONTAINER) || stderr.contains(NO_SUCH_OBJECT)
}

fn inspect_args(sandbox: &SandboxIdentity) -> Vec<String> {
    vec![
        "inspect".to_string(),
        "-f".to_string(),
        "{{.State.Running}}".to_string(),
        sandbox.name.clone(),
    ]
}

/// `ps -a` filtered server-side; the name filter is a regex match.
fn list_args(prefix: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "-a".to_string(),
        "--filter".to_string(),
        format!("name=^{prefix}"),
        "--format".to_string(),
        "{{.Names}}".to_string(),
    ]
}

/// One name per line; keeps only exact prefix matches.
fn parse_names(stdout: &str, prefix: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|name| name.starts_with(prefix))
        .map(ToString::to_string)
        .collect()
}

fn remove_args(sandbox: &SandboxIdentity) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), sandbox.name.clone()]
}

fn create_args(sandbox: &SandboxIdentity) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        sandbox.name.clone(),
    ];

    let limits = &sandbox.limits;
    args.extend(limits.network.run_args().iter().map(ToString::to_string));
    if let Some(memory) = &limits.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(cpus) = &limits.cpus {
        args.push("--cpus".to_string());
        args.push(cpus.clone());
    }

    args.push(sandbox.image.clone());
    args.extend(sandbox.idle_command.iter().cloned());
    args
}

fn exec_args(sandbox: &SandboxIdentity) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "-i".to_string(), sandbox.name.clone()];
    args.extend(sandbox.run_command.iter().cloned());
    args
}
