use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod models;
mod pipeline;
mod scanner;
mod services;

use config::{AppConfig, ProviderKind};
use models::{Outcome, PlanStatus, SeasonSource, TransferMode};
use pipeline::{ExecutionSummary, Pipeline, PipelineEvent, PlanSummary, StageReport};

#[derive(Parser)]
#[command(name = "episode-organizer")]
#[command(about = "Rename downloaded TV episodes into a media-server friendly layout")]
struct Cli {
    /// Folder containing the downloaded episodes
    source: PathBuf,

    /// Series to search for (defaults to a guess from the folder name)
    #[arg(long)]
    series: Option<String>,

    /// Use this exact series name without asking a provider
    #[arg(long, conflicts_with = "series")]
    manual: Option<String>,

    /// Put every numbered file into this season
    #[arg(long)]
    season: Option<u32>,

    /// Which search result to use, starting at 1
    #[arg(long, default_value_t = 1)]
    pick: usize,

    /// Metadata provider: tmdb or omdb
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Target language for titles, e.g. es-ES
    #[arg(long)]
    language: Option<String>,

    /// copy or hardlink
    #[arg(long)]
    mode: Option<TransferMode>,

    /// Destination root (defaults to <SOURCE>/_Organized_Output)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Show the plan without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write the execution results as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over file and environment settings
    fn apply(&self, config: &mut AppConfig) {
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(ref language) = self.language {
            config.language = language.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ref dest) = self.dest {
            config.destination = Some(dest.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "episode_organizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("Invalid configuration")?;
    cli.apply(&mut config);
    config.log_config();

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));

    let pipeline = Pipeline::from_config(config, Arc::new(tx))
        .context("Cannot set up the metadata provider")?;

    // Ctrl+C cancels whatever stage is running
    let signals = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if pipeline.cancel() {
                    tracing::info!("Received Ctrl+C, cancelling...");
                } else {
                    std::process::exit(130);
                }
            }
        })
    };

    let outcome = run(&cli, &pipeline).await;

    // Every pipeline handle must go before the event channel closes
    signals.abort();
    let _ = signals.await;
    drop(pipeline);
    let _ = printer.await;
    outcome
}

async fn run(cli: &Cli, pipeline: &Pipeline) -> Result<()> {
    pipeline
        .select_source_directory(&cli.source)
        .with_context(|| format!("Cannot use {}", cli.source.display()))?;
    let source = pipeline
        .source_directory()
        .context("Source directory was not recorded")?;

    // Scan
    let found = pipeline.start_scan()?.await.context("Scan task panicked")??;
    for warning in pipeline.scan_warnings() {
        match warning.path {
            Some(path) => tracing::warn!("Skipped {}: {}", path.display(), warning.message),
            None => tracing::warn!("Skipped entry: {}", warning.message),
        }
    }
    if found == 0 {
        println!("No video files found in {}", source.display());
        return Ok(());
    }

    if let Some(season) = cli.season {
        let changed = pipeline.override_season(season)?;
        println!("Season {} forced on {} file(s)", season, changed);
    } else {
        let inferred = pipeline
            .discovered_files()
            .unwrap_or_default()
            .iter()
            .filter(|f| f.season_source == Some(SeasonSource::Consensus))
            .count();
        if inferred > 0 {
            println!("Season taken from sibling files for {} file(s)", inferred);
        }
    }

    match &cli.manual {
        Some(name) => {
            pipeline.use_manual_series(name)?;
        }
        None => choose_series(cli, pipeline, &source).await?,
    }
    let selection = pipeline
        .selected_series()
        .context("No series was selected")?;
    match &selection.candidate {
        Some(candidate) => println!(
            "Using '{}' for the output layout ({} episodes from {})",
            selection.series_title, selection.episode_count, candidate.external_id
        ),
        None => println!("Using '{}' for the output layout", selection.series_title),
    }
    if let Some(report) = selection.localization.as_ref().filter(|r| r.is_degraded()) {
        tracing::warn!(
            "{} titles kept in the original language",
            report.untranslated
        );
    }

    // Plan
    let plan = pipeline.plan_preview()?;
    for entry in &plan {
        match (&entry.status, &entry.target_relative_path) {
            (PlanStatus::Resolved, Some(target)) => println!(
                "  {} -> {}",
                entry.source_file.file_name(),
                target.display()
            ),
            (status, _) => println!("  {} ({})", entry.source_file.file_name(), status),
        }
    }
    let summary = PlanSummary::from_plan(&plan);
    println!(
        "Plan for {} files: {} to organize ({} from ambiguous names), {} without match, {} duplicates, {} without episode number",
        summary.total(),
        summary.resolved,
        summary.resolved_ambiguous,
        summary.no_match,
        summary.duplicate,
        summary.invalid_tag
    );

    if cli.dry_run {
        println!("Dry run: nothing written");
        return Ok(());
    }

    // Execute
    let mode = pipeline.config().mode;
    let dest = pipeline
        .destination()
        .context("Destination is unknown")?;
    println!("Writing to {} ({})", dest.display(), mode);
    pipeline
        .start_execution(mode)?
        .await
        .context("Execution task panicked")??;

    let results = pipeline.execution_results();
    let totals = ExecutionSummary::from_results(&results);
    println!(
        "Done: {} copied, {} linked, {} skipped, {} failed",
        totals.copied, totals.linked, totals.skipped, totals.failed
    );

    if let Some(ref path) = cli.report {
        let json = serde_json::to_string_pretty(&results).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if totals.failed > 0 {
        anyhow::bail!("{} file(s) could not be organized", totals.failed);
    }
    Ok(())
}

/// Search the provider and load the picked candidate's episodes
async fn choose_series(cli: &Cli, pipeline: &Pipeline, source: &Path) -> Result<()> {
    let query = match &cli.series {
        Some(series) => series.clone(),
        None => guess_query(source)?,
    };
    println!("Searching {} for '{}'", pipeline.provider_name(), query);
    pipeline
        .search_series(&query)?
        .await
        .context("Search task panicked")??;
    let candidates = pipeline.candidates();
    if candidates.is_empty() {
        anyhow::bail!("No series found for '{}'; try --series", query);
    }

    for (idx, candidate) in candidates.iter().enumerate().take(10) {
        let marker = if idx + 1 == cli.pick { '*' } else { ' ' };
        println!("{} {:>2}. {} [{}]", marker, idx + 1, candidate, candidate.external_id);
    }
    let candidate = cli
        .pick
        .checked_sub(1)
        .and_then(|idx| candidates.get(idx))
        .cloned()
        .with_context(|| format!("--pick {} is out of range (1-{})", cli.pick, candidates.len()))?;

    pipeline
        .select_series(candidate)?
        .await
        .context("Episode fetch task panicked")??;
    Ok(())
}

/// Derive a search query from the source folder name
fn guess_query(source: &Path) -> Result<String> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let query = scanner::parser::guess_series_name(&name);
    if query.is_empty() {
        anyhow::bail!("Cannot guess the series from '{}'; pass --series", name);
    }
    Ok(query)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { run_id, stage } => {
                tracing::debug!(%run_id, "{} started", stage)
            }
            PipelineEvent::FileDiscovered {
                run_id,
                count,
                path,
            } => tracing::debug!(%run_id, "[{}] {}", count, path.display()),
            PipelineEvent::EntryProcessed {
                run_id,
                done,
                total,
                result,
            } => {
                let name = result.entry.source_file.file_name();
                match result.outcome {
                    Outcome::Copied | Outcome::Linked => {
                        println!("[{}/{}] {:?} {}", done, total, result.outcome, name)
                    }
                    Outcome::Failed => eprintln!(
                        "[{}/{}] FAILED {}: {}",
                        done,
                        total,
                        name,
                        result.error_detail.as_deref().unwrap_or("unknown error")
                    ),
                    Outcome::Skipped => tracing::debug!(
                        %run_id,
                        "[{}/{}] skipped {}: {}",
                        done,
                        total,
                        name,
                        result.error_detail.as_deref().unwrap_or("")
                    ),
                }
            }
            PipelineEvent::StageCompleted {
                run_id,
                stage,
                report,
            } => {
                tracing::debug!(%run_id, "{} completed", stage);
                match report {
                    StageReport::Scanned {
                        files,
                        tagged,
                        warnings,
                    } => {
                        println!("Scan: {} video files, {} with episode numbers", files, tagged);
                        if warnings > 0 {
                            println!("Scan: {} entries could not be read", warnings);
                        }
                    }
                    StageReport::Searched { candidates } => {
                        println!("Search: {} candidate(s)", candidates)
                    }
                    StageReport::SeriesLoaded {
                        title,
                        episodes,
                        localization,
                    } => {
                        println!("Episodes: {} for '{}'", episodes, title);
                        if let Some(report) = localization {
                            println!(
                                "Titles: {} translated, {} kept{}",
                                report.translated,
                                report.untranslated,
                                if report.is_degraded() {
                                    " (translation service partly unavailable)"
                                } else {
                                    ""
                                }
                            );
                        }
                    }
                    StageReport::Executed(summary) => tracing::info!(
                        %run_id,
                        "Execution finished: {} copied, {} linked, {} skipped, {} failed",
                        summary.copied,
                        summary.linked,
                        summary.skipped,
                        summary.failed
                    ),
                }
            }
            PipelineEvent::StageFailed {
                run_id,
                stage,
                message,
                configuration,
            } => {
                tracing::debug!(%run_id, "{} failed", stage);
                eprintln!("{} failed: {}", stage, message);
                if configuration {
                    eprintln!("Hint: check the API key in config.toml or the environment");
                }
            }
        }
    }
}
