// src/main.rs
// Migration orchestrator CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::config::{AnalysisConfig, EnvConfig};
use orchestrator::results::load_results;
use orchestrator::scheduler::{JobEvent, JobId, JobOutcome, JobOutput};
use orchestrator::Orchestrator;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Run migration analysis and request fixes for the issues it finds")]
#[command(version)]
struct Cli {
    /// Analysis configuration file (default: ~/.orchestrator/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analyzer and ingest its results
    Analyze {
        /// Write results here instead of the configured output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show issues from an existing output directory
    Results {
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full issue index as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request a fix for one file's issues
    Fix {
        /// File to fix
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => std::env::var("ORCHESTRATOR_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::WARN),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Wait for the job's outcome; Ctrl-C cancels the job and keeps waiting for it to stop
async fn wait_or_cancel(
    orchestrator: &Orchestrator,
    events: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
    file: &Path,
) -> Result<JobOutcome> {
    let wait = orchestrator.wait(events, job_id);
    tokio::pin!(wait);

    tokio::select! {
        outcome = &mut wait => return Ok(outcome?),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling...");
            orchestrator.cancel(file);
        }
    }
    Ok(wait.await?)
}

async fn run_analyze(env: &EnvConfig, config: AnalysisConfig, output: Option<PathBuf>) -> Result<()> {
    let root = config
        .application_root()
        .map(Path::to_path_buf)
        .context("input is missing from configuration")?;

    let orchestrator = Orchestrator::new(env)?;
    orchestrator.start();

    let mut events = orchestrator.subscribe();
    let receipt = orchestrator.analyze(config, output)?;
    info!(job_id = %receipt.job_id, "Analysis submitted");

    let outcome = wait_or_cancel(&orchestrator, &mut events, receipt.job_id, &root).await;
    orchestrator.stop().await;

    match outcome? {
        JobOutcome::Completed(JobOutput::Analysis(summary)) => {
            println!("Analysis complete: {}", summary.output_location.display());
            println!(
                "  {} issues in {} files ({} incidents skipped)",
                summary.hint_count, summary.file_count, summary.skipped_incidents
            );
            if let Some(ms) = summary.duration_ms {
                println!("  took {:.1}s", ms as f64 / 1000.0);
            }
            Ok(())
        }
        JobOutcome::Completed(other) => anyhow::bail!("unexpected analysis output: {:?}", other),
        JobOutcome::Failed(failure) => anyhow::bail!("analysis failed: {}", failure),
        JobOutcome::Cancelled => {
            println!("Analysis cancelled");
            Ok(())
        }
    }
}

async fn run_results(config: &AnalysisConfig, output: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = config.output_dir(output.as_deref())?;
    let report = load_results(&dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.index)?);
        return Ok(());
    }

    for (file, issues) in report.index.iter() {
        println!("{:>5}  {}", issues.len(), file.display());
    }
    println!(
        "{} issues in {} files ({} incidents skipped)",
        report.hint_count(),
        report.index.len(),
        report.skipped_count()
    );
    Ok(())
}

async fn run_fix(env: &EnvConfig, config: &AnalysisConfig, file: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let file = if file.is_absolute() {
        file
    } else {
        std::env::current_dir()?.join(file)
    };

    let orchestrator = Orchestrator::new(env)?;
    let dir = config.output_dir(output.as_deref())?;
    let report = load_results(&dir).await?;
    orchestrator.results().replace(&config.name, report);
    orchestrator.start();

    let mut events = orchestrator.subscribe();
    let receipt = orchestrator.fix(&file, config, output.as_deref())?;
    info!(job_id = %receipt.job_id, file = %file.display(), "Fix submitted");

    let outcome = wait_or_cancel(&orchestrator, &mut events, receipt.job_id, &file).await;
    orchestrator.stop().await;

    match outcome? {
        JobOutcome::Completed(JobOutput::Fix(fix)) => {
            if let Some(reasoning) = &fix.response.total_reasoning {
                println!("{}", reasoning);
            }
            match &fix.proposed_file {
                Some(path) => println!("Proposed file written to {}", path.display()),
                None => println!("Backend returned no updated file"),
            }
            Ok(())
        }
        JobOutcome::Completed(other) => anyhow::bail!("unexpected fix output: {:?}", other),
        JobOutcome::Failed(failure) => anyhow::bail!("fix failed: {}", failure),
        JobOutcome::Cancelled => {
            println!("Fix cancelled");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env files (global first, then project - project overrides)
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".orchestrator/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let env = EnvConfig::load();
    let config = AnalysisConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { output } => run_analyze(&env, config, output).await?,
        Commands::Results { output, json } => run_results(&config, output, json).await?,
        Commands::Fix { file, output } => run_fix(&env, &config, file, output).await?,
    }

    Ok(())
}
