//! judge-runner: executes untrusted code submissions in a pool of warm,
//! isolated containers.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod payload;
mod pool;
mod sandbox;
mod templates;

use config::{Config, Overrides, CONFIG_FILE};

#[derive(Parser)]
#[command(name = "judge-runner")]
#[command(
    author,
    version,
    about = "Run code submissions in a pool of warm sandbox containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "RUNNER_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(flatten)]
    overrides: OverrideArgs,
}

/// Settings that take precedence over the configuration file.
#[derive(Args)]
struct OverrideArgs {
    /// Number of sandboxes in the pool
    #[arg(long, global = true, env = "RUNNER_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Sandbox image
    #[arg(long, global = true, env = "RUNNER_IMAGE")]
    image: Option<String>,

    /// Container runtime binary
    #[arg(long, global = true, env = "RUNNER_RUNTIME")]
    runtime: Option<String>,

    /// Per-job timeout in milliseconds
    #[arg(long, global = true, env = "RUNNER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// How containers are driven
    #[arg(long, global = true, value_enum, env = "RUNNER_DRIVER")]
    driver: Option<sandbox::Driver>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            pool_size: args.pool_size,
            image: args.image,
            runtime: args.runtime,
            timeout_ms: args.timeout_ms,
            driver: args.driver,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter runner.toml and sample submission
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Execute submissions through the sandbox pool
    Run {
        /// Submission JSON files ('-' reads stdin)
        #[arg(required = true)]
        payloads: Vec<String>,

        /// Leave sandbox containers running afterwards
        #[arg(long)]
        keep: bool,

        /// Print results and pool statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the configured sandbox containers
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("judge_runner=debug")
        } else {
            EnvFilter::new("judge_runner=info")
        }
    });

    let (json_layer, text_layer) = if cli.json_logs {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
        Commands::Run {
            payloads,
            keep,
            json,
        } => {
            let config = load_config(&cli.config, cli.overrides)?;
            commands::run::run(&config, &payloads, keep, json).await?;
        }
        Commands::Clean => {
            let config = load_config(&cli.config, cli.overrides)?;
            commands::clean::run(&config).await?;
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path, overrides: OverrideArgs) -> Result<Config> {
    debug!("Loading config from {}", path.display());
    Ok(Config::load(path)?.with_overrides(overrides.into()))
}
