//! Write a starter configuration and sample submission.
//!
//! Pure planning logic takes an `exists` closure and a writer so it can be
//! tested without touching the filesystem.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::CONFIG_FILE;
use crate::templates;

const SAMPLE_FILE: &str = "sample-submission.json";

/// File written by `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InitFile {
    path: PathBuf,
    content: &'static str,
    description: &'static str,
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    Skipped,
}

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing judge-runner in {}", cwd.display());

    let files = init_files();
    let results = write_files(
        &files,
        force,
        |path| cwd.join(path).exists(),
        |path, content| {
            fs::write(cwd.join(path), content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_results(&files, &results));
    Ok(())
}

fn init_files() -> Vec<InitFile> {
    vec![
        InitFile {
            path: PathBuf::from(CONFIG_FILE),
            content: templates::RUNNER_TOML,
            description: "Pool and sandbox configuration",
        },
        InitFile {
            path: PathBuf::from(SAMPLE_FILE),
            content: templates::SAMPLE_SUBMISSION,
            description: "Example submission payload",
        },
    ]
}

/// Writes every file unless it exists and `force` is off.
fn write_files<E, W>(
    files: &[InitFile],
    force: bool,
    exists: E,
    mut write: W,
) -> Result<Vec<WriteResult>>
where
    E: Fn(&Path) -> bool,
    W: FnMut(&Path, &str) -> Result<()>,
{
    files
        .iter()
        .map(|file| {
            let existed = exists(&file.path);
            if existed && !force {
                return Ok(WriteResult::Skipped);
            }
            write(&file.path, file.content)?;
            Ok(if existed {
                WriteResult::Overwritten
            } else {
                WriteResult::Created
            })
        })
        .collect()
}

fn format_results(files: &[InitFile], results: &[WriteResult]) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "\n{} judge-runner initialized\n",
        "✓".green().bold()
    )
    .unwrap();

    for (file, result) in files.iter().zip(results) {
        let path = file.path.display().to_string();
        match result {
            WriteResult::Created => {
                writeln!(&mut out, "  {} - {}", path.cyan(), file.description).unwrap();
            }
            WriteResult::Overwritten => {
                writeln!(&mut out, "  {} {path} (overwritten)", "↻".blue()).unwrap();
            }
            WriteResult::Skipped => writeln!(
                &mut out,
                "  {} {path} (already exists, use --force to overwrite)",
                "⊘".yellow()
            )
            .unwrap(),
        }
    }

    writeln!(&mut out, "\n{}", "Next steps:".yellow().bold()).unwrap();
    writeln!(
        &mut out,
        "  1. Point {} at your sandbox image",
        CONFIG_FILE.cyan()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  2. Run {}",
        format!("judge-runner run {SAMPLE_FILE}").green()
    )
    .unwrap();
    out
}
