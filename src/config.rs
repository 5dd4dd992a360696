use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::sandbox::{Driver, NetworkPolicy, ResourceLimits, SandboxIdentity};

pub const CONFIG_FILE: &str = "runner.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Pool sizing and naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of warm sandboxes
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Sandbox containers are named `<name_prefix>-<index>`
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            name_prefix: default_name_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// How containers are driven: "cli" spawns `runtime`, "api" uses the
    /// Docker Engine socket
    #[serde(default)]
    pub driver: Driver,

    /// Container runtime binary
    /// - Default: "docker"
    /// - Podman: "podman"
    /// - Custom: "/path/to/docker"
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Image the sandboxes are started from
    #[serde(default = "default_image")]
    pub image: String,

    /// Keep-alive command, split like a shell would
    #[serde(default = "default_idle_command")]
    pub idle_command: String,

    /// Per-job command; reads the payload on stdin
    #[serde(default = "default_run_command")]
    pub run_command: String,

    /// Hard per-job timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            driver: Driver::default(),
            runtime: default_runtime(),
            image: default_image(),
            idle_command: default_idle_command(),
            run_command: default_run_command(),
            timeout_ms: default_timeout_ms(),
            resources: ResourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "512m"); empty disables the limit
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "1"); empty disables the limit
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Network policy
    #[serde(default)]
    pub network: NetworkPolicy,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
            network: NetworkPolicy::default(),
        }
    }
}

// Default value functions
fn default_pool_size() -> usize {
    2
}

fn default_name_prefix() -> String {
    "judge-python-worker".to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "judge-python:latest".to_string()
}

fn default_idle_command() -> String {
    "sleep infinity".to_string()
}

fn default_run_command() -> String {
    "python3 /sandbox/run_submission.py".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub pool_size: Option<usize>,
    pub image: Option<String>,
    pub runtime: Option<String>,
    pub timeout_ms: Option<u64>,
    pub driver: Option<Driver>,
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Apply command line / environment overrides on top of the file
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(size) = overrides.pool_size {
            self.pool.size = size;
        }
        if let Some(image) = overrides.image {
            self.sandbox.image = image;
        }
        if let Some(runtime) = overrides.runtime {
            self.sandbox.runtime = runtime;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.sandbox.timeout_ms = timeout_ms;
        }
        if let Some(driver) = overrides.driver {
            self.sandbox.driver = driver;
        }
        self
    }

    /// Check values the pool cannot work around.
    ///
    /// Pool size is left to the pool itself, which rejects zero.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox.timeout_ms == 0 {
            anyhow::bail!("[sandbox] timeout_ms must be greater than zero");
        }
        if self.sandbox.runtime.trim().is_empty() {
            anyhow::bail!("[sandbox] runtime must not be empty");
        }
        if self.sandbox.image.trim().is_empty() {
            anyhow::bail!("[sandbox] image must not be empty");
        }
        split_command("idle_command", &self.sandbox.idle_command)?;
        split_command("run_command", &self.sandbox.run_command)?;
        Ok(())
    }

    /// Container name of the sandbox in slot `index`
    pub fn sandbox_name(&self, index: usize) -> String {
        format!("{}-{}", self.pool.name_prefix, index)
    }

    /// Name prefix shared by every container this pool has ever created
    pub fn container_prefix(&self) -> String {
        format!("{}-", self.pool.name_prefix)
    }

    /// One identity per pool slot
    pub fn identities(&self) -> Result<Vec<SandboxIdentity>> {
        (0..self.pool.size)
            .map(|index| self.identity(self.sandbox_name(index)))
            .collect()
    }

    /// Identity of a sandbox container with the given name
    pub fn identity(&self, name: String) -> Result<SandboxIdentity> {
        let sandbox = &self.sandbox;
        Ok(SandboxIdentity {
            runtime: sandbox.runtime.clone(),
            image: sandbox.image.clone(),
            name,
            idle_command: split_command("idle_command", &sandbox.idle_command)?,
            run_command: split_command("run_command", &sandbox.run_command)?,
            timeout: Duration::from_millis(sandbox.timeout_ms),
            limits: ResourceLimits {
                memory: non_empty(&sandbox.resources.memory),
                cpus: non_empty(&sandbox.resources.cpus),
                network: sandbox.resources.network,
            },
        })
    }
}

fn split_command(field: &str, command: &str) -> Result<Vec<String>> {
    let parts = shell_words::split(command)
        .with_context(|| format!("Failed to parse [sandbox] {field}: {command}"))?;
    if parts.is_empty() {
        anyhow::bail!("[sandbox] {field} must not be empty");
    }
    Ok(parts)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.name_prefix, "judge-python-worker");
        assert_eq!(config.sandbox.runtime, "docker");
        assert_eq!(config.sandbox.driver, Driver::Cli);
        assert_eq!(config.sandbox.timeout_ms, 10_000);
        assert_eq!(config.sandbox.resources.network, NetworkPolicy::Deny);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[pool]
size = 4
name_prefix = "judge"

[sandbox]
runtime = "podman"
image = "registry.local/judge:3.12"
run_command = "python3 -u '/opt/judge/run submission.py'"
timeout_ms = 2500

[sandbox.resources]
memory = ""
network = "allow-all"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.sandbox.runtime, "podman");
        assert_eq!(config.sandbox.idle_command, "sleep infinity");
        assert_eq!(config.sandbox.resources.cpus, "1");
        assert_eq!(config.sandbox.resources.network, NetworkPolicy::AllowAll);

        let identities = config.identities().unwrap();
        assert_eq!(identities.len(), 4);
        assert_eq!(identities[3].name, "judge-3");
        assert_eq!(
            identities[0].run_command,
            ["python3", "-u", "/opt/judge/run submission.py"]
        );
        assert_eq!(identities[0].timeout, Duration::from_millis(2500));
        assert_eq!(identities[0].limits.memory, None);
        assert_eq!(identities[0].limits.cpus.as_deref(), Some("1"));
    }

    #[test]
    fn test_identity_for_any_name() {
        let config = Config::default();
        assert_eq!(config.container_prefix(), "judge-python-worker-");

        let identity = config.identity("judge-python-worker-9".to_string()).unwrap();
        assert_eq!(identity.name, "judge-python-worker-9");
        assert_eq!(identity.idle_command, ["sleep", "infinity"]);
        assert_eq!(identity, config.identity(identity.name.clone()).unwrap());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let config = Config::default().with_overrides(Overrides {
            pool_size: Some(8),
            image: Some("judge:dev".to_string()),
            runtime: None,
            timeout_ms: Some(500),
            driver: Some(Driver::Api),
        });
        assert_eq!(config.pool.size, 8);
        assert_eq!(config.sandbox.image, "judge:dev");
        assert_eq!(config.sandbox.runtime, "docker");
        assert_eq!(config.sandbox.timeout_ms, 500);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sandbox.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sandbox.run_command = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sandbox.idle_command = "sleep 'infinity".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_pool_size_is_left_to_the_pool() {
        let mut config = Config::default();
        config.pool.size = 0;
        assert!(config.validate().is_ok());
        assert!(config.identities().unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.pool.size, 2);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[pool]\nsize = \"many\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
