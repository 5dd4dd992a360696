//! Boot a pool, push payloads through it and report the results.
//!
//! This is the bootstrap path: configuration in, one pool for the lifetime
//! of the command, every sandbox disposed on the way out.

use anyhow::{Context, Result};
use colored::Colorize;
use futures_util::future::join_all;
use serde_json::json;
use std::fmt::Write;
use std::io::Read;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::payload::Submission;
use crate::pool::{Pool, PoolError, PoolStats};
use crate::sandbox::{ContainerRuntime, Sandbox};

/// Path that reads the payload from stdin.
const STDIN_PATH: &str = "-";

/// Result of one submitted payload, labelled by its source.
type Outcome = (String, Result<String, PoolError>);

/// Builds a pool with one sandbox per configured slot.
pub fn build_pool(config: &Config, runtime: &Arc<dyn ContainerRuntime>) -> Result<Pool> {
    let sandboxes = config
        .identities()?
        .into_iter()
        .map(|identity| Sandbox::new(identity, Arc::clone(runtime)))
        .collect();
    Ok(Pool::new(sandboxes)?)
}

/// Reads and validates every payload before any container is touched.
///
/// The bytes are forwarded unchanged; parsing only rejects malformed files.
fn load_payloads(paths: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
    paths
        .iter()
        .map(|path| {
            let raw = if path == STDIN_PATH {
                let mut raw = String::new();
                std::io::stdin()
                    .read_to_string(&mut raw)
                    .context("Failed to read payload from stdin")?;
                raw
            } else {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read payload: {path}"))?
            };
            Submission::from_json(&raw).with_context(|| format!("In payload: {path}"))?;
            Ok((path.clone(), raw.into_bytes()))
        })
        .collect()
}

/// Submits every payload and waits for all of them.
async fn submit_all(pool: &Pool, payloads: Vec<(String, Vec<u8>)>) -> Vec<Outcome> {
    let handles: Vec<_> = payloads
        .into_iter()
        .map(|(label, payload)| {
            let handle = pool.submit(payload);
            info!(job = %handle.id(), payload = %label, "Submitted");
            (label, handle)
        })
        .collect();

    join_all(
        handles
            .into_iter()
            .map(|(label, handle)| async move { (label, handle.await) }),
    )
    .await
}

/// Format job outcomes for the terminal
fn format_outcomes(outcomes: &[Outcome]) -> String {
    let mut out = String::new();
    for (label, result) in outcomes {
        match result {
            Ok(output) => {
                writeln!(&mut out, "\n{} {}", "✓".green().bold(), label.cyan()).unwrap();
                writeln!(&mut out, "{}", output.trim_end()).unwrap();
            }
            Err(err) => {
                writeln!(&mut out, "\n{} {}", "✗".red().bold(), label.cyan()).unwrap();
                writeln!(&mut out, "{}", err.to_string().red()).unwrap();
            }
        }
    }
    out
}

/// Format pool statistics for the terminal
fn format_stats(stats: &PoolStats) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(40).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Sandbox Pool".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(40).dimmed()).unwrap();
    writeln!(&mut out, "  Pool size:   {}", stats.pool_size.to_string().cyan()).unwrap();
    writeln!(&mut out, "  Active:      {}", stats.active_workers.to_string().cyan()).unwrap();
    writeln!(&mut out, "  Queued:      {}", stats.queue_length.to_string().cyan()).unwrap();
    writeln!(&mut out, "  Total runs:  {}", stats.total_runs.to_string().cyan()).unwrap();

    let errors = stats.error_count.to_string();
    let errors = if stats.error_count > 0 {
        errors.red()
    } else {
        errors.green()
    };
    writeln!(&mut out, "  Errors:      {errors}").unwrap();

    if stats.total_runs > 0 {
        writeln!(&mut out, "  Avg run:     {:.2} ms", stats.avg_run_ms).unwrap();
        writeln!(&mut out, "  Avg wait:    {:.2} ms", stats.avg_queue_wait_ms).unwrap();
    }
    if let Some(last) = stats.last_run_at {
        writeln!(
            &mut out,
            "  Last run:    {}",
            last.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
        )
        .unwrap();
    }
    writeln!(&mut out, "{}", "━".repeat(40).dimmed()).unwrap();
    out
}

/// Short machine-readable label for a job failure
fn error_kind(err: &PoolError) -> &'static str {
    if err.is_misconfigured() {
        return "pool-misconfigured";
    }
    match err.as_sandbox() {
        Some(err) if err.is_environment_unavailable() => "environment-unavailable",
        Some(err) if err.is_execution_failed() => "execution-failed",
        Some(_) => "environment-lost",
        None => "abandoned",
    }
}

/// Machine-readable report of outcomes and statistics
fn json_report(outcomes: &[Outcome], stats: &PoolStats) -> serde_json::Value {
    let results: Vec<_> = outcomes
        .iter()
        .map(|(label, result)| match result {
            Ok(output) => json!({ "payload": label, "ok": true, "output": output }),
            Err(err) => json!({
                "payload": label,
                "ok": false,
                "kind": error_kind(err),
                "error": err.to_string(),
            }),
        })
        .collect();
    json!({ "results": results, "stats": stats })
}

/// Entry point: runs every payload through a freshly built pool
pub async fn run(config: &Config, paths: &[String], keep: bool, json_output: bool) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("No payloads given. Pass one or more JSON files, or '-' for stdin");
    }
    config.validate()?;
    let payloads = load_payloads(paths)?;

    let runtime = config.sandbox.driver.connect()?;
    let pool = build_pool(config, &runtime)?;
    pool.warm().await;

    let outcomes = submit_all(&pool, payloads).await;

    finish(&pool, &outcomes, keep, json_output).await
}

/// Prints the report and tears the pool down.
///
/// Disposal happens before any error is returned so that a failed report
/// or failed jobs never leave containers behind.
async fn finish(pool: &Pool, outcomes: &[Outcome], keep: bool, json_output: bool) -> Result<()> {
    let report = render_report(outcomes, &pool.stats(), json_output);

    if !keep {
        pool.dispose().await;
    }

    print!("{}", report?);
    check_outcomes(outcomes)
}

/// Renders the final report; rendering never touches the pool.
fn render_report(outcomes: &[Outcome], stats: &PoolStats, json_output: bool) -> Result<String> {
    if json_output {
        let json = serde_json::to_string_pretty(&json_report(outcomes, stats))
            .context("Failed to render JSON report")?;
        return Ok(format!("{json}\n"));
    }
    Ok(format!("{}{}", format_outcomes(outcomes), format_stats(stats)))
}

fn check_outcomes(outcomes: &[Outcome]) -> Result<()> {
    let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} job(s) failed", outcomes.len());
    }
    Ok(())
}
