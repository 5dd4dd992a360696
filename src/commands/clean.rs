//! Remove the pool's sandbox containers.
//!
//! Targets every configured slot plus any container carrying the pool's
//! name prefix, so slots left over from a larger pool are cleaned as well.
//! Removal goes through the same `ContainerRuntime` seam as the pool, so the
//! core logic runs against the mock runtime in tests.

use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeSet;
use std::fmt::Write;
use tracing::warn;

use crate::config::Config;
use crate::sandbox::{ContainerRuntime, SandboxIdentity};

/// Outcome of removing one sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
    Failed(String),
}

/// Configured slot names plus every existing container with the prefix.
async fn collect_targets(
    runtime: &dyn ContainerRuntime,
    config: &Config,
) -> Result<Vec<SandboxIdentity>> {
    let mut names: BTreeSet<String> = (0..config.pool.size)
        .map(|index| config.sandbox_name(index))
        .collect();

    let prefix = config.container_prefix();
    match runtime.list(&config.sandbox.runtime, &prefix).await {
        Ok(found) => names.extend(found),
        Err(err) => warn!(prefix = %prefix, "Failed to list sandbox containers: {err}"),
    }

    names.into_iter().map(|name| config.identity(name)).collect()
}

/// Force-removes every sandbox, one after another.
pub async fn remove_sandboxes(
    runtime: &dyn ContainerRuntime,
    identities: &[SandboxIdentity],
) -> Vec<(String, Removal)> {
    let mut results = Vec::with_capacity(identities.len());
    for identity in identities {
        let removal = match runtime.remove(identity).await {
            Ok(()) => Removal::Removed,
            Err(err) if err.is_environment_lost() => Removal::NotFound,
            Err(err) => {
                warn!(sandbox = %identity.name, "Failed to remove sandbox: {err}");
                Removal::Failed(err.to_string())
            }
        };
        results.push((identity.name.clone(), removal));
    }
    results
}

/// Format the clean results as a displayable string
pub fn format_results(results: &[(String, Removal)]) -> String {
    let mut out = String::new();
    if results.iter().all(|(_, r)| *r == Removal::NotFound) {
        writeln!(&mut out, "\n{} No sandbox containers found.", "ℹ".blue()).unwrap();
        return out;
    }

    writeln!(&mut out, "\n{} Sandbox containers:", "✓".green()).unwrap();
    for (name, removal) in results {
        match removal {
            Removal::Removed => writeln!(&mut out, "  {} {}", "✗".red(), name.dimmed()),
            Removal::NotFound => writeln!(&mut out, "  {} {} (not running)", "·".dimmed(), name),
            Removal::Failed(message) => {
                writeln!(&mut out, "  {} {}: {}", "⚠".yellow(), name, message)
            }
        }
        .unwrap();
    }
    out
}

/// Entry point: removes the containers named by the configuration
pub async fn run(config: &Config) -> Result<()> {
    config.validate()?;

    let runtime = config.sandbox.driver.connect()?;
    let identities = collect_targets(runtime.as_ref(), config).await?;
    let results = remove_sandboxes(runtime.as_ref(), &identities).await;
    print!("{}", format_results(&results));

    let failed = results
        .iter()
        .filter(|(_, r)| matches!(r, Removal::Failed(_)))
        .count();
    if failed > 0 {
        anyhow::bail!("Failed to remove {failed} sandbox container(s)");
    }
    Ok(())
}
