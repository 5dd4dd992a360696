//! In-memory container runtime for testing.
//!
//! Tracks which containers are alive, counts every runtime call and records
//! how many invocations overlap, so tests can assert on pool behavior
//! without a container daemon.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::error::NO_SUCH_CONTAINER;
use super::{ContainerRuntime, ExecOutput, SandboxError, SandboxIdentity};

/// Scripted behavior for a single `exec` call.
#[derive(Debug, Clone)]
pub(crate) enum MockExec {
    /// Echo the payload back on stdout.
    Echo,
    /// Exit with status 1 and the given stderr.
    Fail(String),
    /// Sleep for the given duration before echoing.
    Hang(Duration),
    /// The container disappears just before the invocation.
    Lost,
}

#[derive(Debug, Default)]
struct MockState {
    alive: HashSet<String>,
    script: VecDeque<MockExec>,
    create_error: Option<String>,
    /// Sandbox name of every exec, in call order
    exec_log: Vec<String>,
    /// Payload of every successful exec, in completion order
    payload_log: Vec<String>,
    /// Payload of every exec, in the order invocations started
    start_log: Vec<String>,
    busy: HashMap<String, usize>,
    max_per_sandbox: usize,
}

/// A mock container runtime.
#[derive(Debug, Default)]
pub(crate) struct MockRuntime {
    state: Mutex<MockState>,
    latency: Duration,
    is_running_calls: AtomicUsize,
    create_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    exec_calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every runtime call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queues exec behaviors; once exhausted every exec echoes.
    pub fn script(&self, execs: Vec<MockExec>) {
        self.state().script.extend(execs);
    }

    /// Makes every subsequent create fail with the given message.
    pub fn fail_create(&self, message: &str) {
        self.state().create_error = Some(message.to_string());
    }

    /// Marks a container as already running.
    pub fn spawn_alive(&self, name: &str) {
        self.state().alive.insert(name.to_string());
    }

    /// Kills a container behind the sandbox's back.
    pub fn destroy(&self, name: &str) {
        self.state().alive.remove(name);
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.state().alive.contains(name)
    }

    pub fn is_running_calls(&self) -> usize {
        self.is_running_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> usize {
        self.exec_calls.load(Ordering::SeqCst)
    }

    /// Invocations currently in progress.
    pub fn running_execs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of invocations ever in progress at once.
    pub fn max_running_execs(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Highest number of invocations ever in progress in one container.
    pub fn max_concurrent_per_sandbox(&self) -> usize {
        self.state().max_per_sandbox
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.state().exec_log.clone()
    }

    pub fn payload_log(&self) -> Vec<String> {
        self.state().payload_log.clone()
    }

    pub fn start_log(&self) -> Vec<String> {
        self.state().start_log.clone()
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// Counts an invocation as in progress until dropped.
struct ExecGuard<'a> {
    runtime: &'a MockRuntime,
    name: String,
}

impl<'a> ExecGuard<'a> {
    fn enter(runtime: &'a MockRuntime, name: &str) -> Self {
        let now = runtime.running.fetch_add(1, Ordering::SeqCst) + 1;
        runtime.max_running.fetch_max(now, Ordering::SeqCst);

        let mut state = runtime.state();
        let busy = state.busy.entry(name.to_string()).or_default();
        *busy += 1;
        let busy = *busy;
        state.max_per_sandbox = state.max_per_sandbox.max(busy);

        Self {
            runtime,
            name: name.to_string(),
        }
    }
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.runtime.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(busy) = self.runtime.state().busy.get_mut(&self.name) {
            *busy -= 1;
        }
    }
}

fn missing(name: &str) -> String {
    format!("Error response from daemon: {NO_SUCH_CONTAINER}: {name}")
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn is_running(&self, sandbox: &SandboxIdentity) -> Result<bool, SandboxError> {
        self.is_running_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.is_alive(&sandbox.name))
    }

    async fn remove(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.state().alive.remove(&sandbox.name) {
            Ok(())
        } else {
            Err(SandboxError::environment_lost(&sandbox.name, missing(&sandbox.name)))
        }
    }

    async fn list(&self, _runtime: &str, prefix: &str) -> Result<Vec<String>, SandboxError> {
        let mut names: Vec<String> = self
            .state()
            .alive
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create(&self, sandbox: &SandboxIdentity) -> Result<(), SandboxError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let mut state = self.state();
        if let Some(message) = &state.create_error {
            return Err(SandboxError::environment_unavailable(message.clone()));
        }
        state.alive.insert(sandbox.name.clone());
        Ok(())
    }

    async fn exec(
        &self,
        sandbox: &SandboxIdentity,
        payload: &[u8],
    ) -> Result<ExecOutput, SandboxError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = ExecGuard::enter(self, &sandbox.name);

        let behavior = {
            let mut state = self.state();
            state.exec_log.push(sandbox.name.clone());
            state
                .start_log
                .push(String::from_utf8_lossy(payload).into_owned());
            let behavior = state.script.pop_front().unwrap_or(MockExec::Echo);
            if matches!(behavior, MockExec::Lost) {
                state.alive.remove(&sandbox.name);
            }
            behavior
        };

        self.delay().await;
        if let MockExec::Hang(duration) = &behavior {
            tokio::time::sleep(*duration).await;
        }

        if !self.is_alive(&sandbox.name) {
            return Ok(ExecOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: missing(&sandbox.name).into_bytes(),
            });
        }

        match behavior {
            MockExec::Fail(stderr) => Ok(ExecOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: stderr.into_bytes(),
            }),
            MockExec::Echo | MockExec::Hang(_) | MockExec::Lost => {
                self.state()
                    .payload_log
                    .push(String::from_utf8_lossy(payload).into_owned());
                Ok(ExecOutput {
                    code: Some(0),
                    stdout: payload.to_vec(),
                    stderr: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::instance::tests::identity;

    #[tokio::test]
    async fn test_mock_exec_on_missing_container_reports_not_found() {
        let runtime = MockRuntime::new();
        let output = runtime.exec(&identity("w-0"), b"{}").await.unwrap();
        assert!(!output.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains(NO_SUCH_CONTAINER));
    }

    #[tokio::test]
    async fn test_mock_script_then_echo() {
        let runtime = MockRuntime::new();
        runtime.spawn_alive("w-0");
        runtime.script(vec![MockExec::Fail("boom".to_string())]);

        let first = runtime.exec(&identity("w-0"), b"a").await.unwrap();
        let second = runtime.exec(&identity("w-0"), b"b").await.unwrap();

        assert_eq!(first.stderr, b"boom");
        assert_eq!(second.stdout, b"b");
        assert_eq!(runtime.exec_calls(), 2);
        assert_eq!(runtime.running_execs(), 0);
    }
}
