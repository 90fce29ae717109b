// Pipeline controller: session state, single active stage, events, cancellation

pub mod executor;
pub mod plan;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::models::{
    DiscoveredFile, EpisodeMap, ExecutionResult, PlanEntry, SeasonSource, SeriesCandidate,
    TransferMode,
};
use crate::scanner::{apply_season_consensus, DirectoryScanner, ScanWarning};
use crate::services::provider::language_base;
use crate::services::{build_provider, LocalizationReport, Localizer, MetadataProvider};

pub use executor::ExecutionSummary;
pub use plan::PlanSummary;
use plan::{build_plan, untitled_episodes};

/// Long-running units of work; at most one runs at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Search,
    FetchEpisodes,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Scan => write!(f, "scan"),
            Stage::Search => write!(f, "search"),
            Stage::FetchEpisodes => write!(f, "episode fetch"),
            Stage::Execute => write!(f, "execution"),
        }
    }
}

/// What a finished stage produced
#[derive(Debug, Clone)]
pub enum StageReport {
    Scanned {
        files: usize,
        tagged: usize,
        warnings: usize,
    },
    Searched {
        candidates: usize,
    },
    SeriesLoaded {
        title: String,
        episodes: usize,
        localization: Option<LocalizationReport>,
    },
    Executed(ExecutionSummary),
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        run_id: Uuid,
        stage: Stage,
    },
    FileDiscovered {
        run_id: Uuid,
        count: usize,
        path: PathBuf,
    },
    EntryProcessed {
        run_id: Uuid,
        done: usize,
        total: usize,
        result: ExecutionResult,
    },
    StageCompleted {
        run_id: Uuid,
        stage: Stage,
        report: StageReport,
    },
    StageFailed {
        run_id: Uuid,
        stage: Stage,
        message: String,
        configuration: bool,
    },
}

/// Receiver of pipeline events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl EventSink for mpsc::UnboundedSender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        // A dropped receiver just means nobody is listening
        let _ = self.send(event);
    }
}

/// Result of `select_series` or `use_manual_series`
#[derive(Debug, Clone)]
pub struct SeriesSelection {
    /// Provider entry; `None` for a typed series name
    pub candidate: Option<SeriesCandidate>,
    /// Title used for the output layout (localized when possible)
    pub series_title: String,
    pub episode_count: usize,
    pub localization: Option<LocalizationReport>,
}

pub type StageHandle<T> = JoinHandle<Result<T, PipelineError>>;

/// Where plan titles come from
enum EpisodeSource {
    Provider(EpisodeMap),
    /// Typed series name; every tagged file resolves without a title
    Manual,
}

#[derive(Default)]
struct Session {
    source: Option<PathBuf>,
    files: Option<Vec<DiscoveredFile>>,
    scan_warnings: Vec<ScanWarning>,
    candidates: Vec<SeriesCandidate>,
    series: Option<(SeriesSelection, EpisodeSource)>,
    plan: Option<Vec<PlanEntry>>,
    results: Vec<ExecutionResult>,
}

struct ActiveRun {
    stage: Stage,
    run_id: Uuid,
    cancel: CancellationToken,
}

/// Holds the single-run slot; frees it on drop
struct RunGuard {
    slot: Arc<Mutex<Option<ActiveRun>>>,
    stage: Stage,
    run_id: Uuid,
    cancel: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().map(|run| run.run_id) == Some(self.run_id) {
            *slot = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    config: AppConfig,
    provider: Arc<dyn MetadataProvider>,
    localizer: Option<Localizer>,
    events: Arc<dyn EventSink>,
    session: Mutex<Session>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

/// One organizing session over a source directory
///
/// Long operations return a `StageHandle` immediately and report through
/// the event sink; the handle resolves to the stage's result.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn MetadataProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let localizer = config.localize.then(|| {
            Localizer::new(&config.language).with_endpoint(config.wikidata_endpoint.clone())
        });

        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                localizer,
                events,
                session: Mutex::new(Session::default()),
                active: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Build the pipeline with the provider named in the configuration
    pub fn from_config(config: AppConfig, events: Arc<dyn EventSink>) -> Result<Self, PipelineError> {
        let provider = build_provider(&config)?;
        Ok(Self::new(config, provider, events))
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    /// Stage currently running, if any
    pub fn active_stage(&self) -> Option<Stage> {
        lock(&self.inner.active).as_ref().map(|run| run.stage)
    }

    /// Request cancellation of the running stage; false when idle
    pub fn cancel(&self) -> bool {
        match lock(&self.inner.active).as_ref() {
            Some(run) => {
                tracing::info!(run_id = %run.run_id, "Cancelling {}", run.stage);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, stage: Stage) -> Result<RunGuard, PipelineError> {
        let mut slot = lock(&self.inner.active);
        if let Some(run) = slot.as_ref() {
            return Err(PipelineError::Busy(run.stage));
        }

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRun {
            stage,
            run_id,
            cancel: cancel.clone(),
        });

        Ok(RunGuard {
            slot: self.inner.active.clone(),
            stage,
            run_id,
            cancel,
        })
    }

    /// Run `work` on a background task, emitting start/completion events
    fn spawn_stage<T, Fut>(&self, guard: RunGuard, work: Fut) -> StageHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<(T, StageReport), PipelineError>> + Send + 'static,
    {
        let events = self.inner.events.clone();
        let (stage, run_id) = (guard.stage, guard.run_id);

        tracing::info!(%run_id, "Starting {}", stage);
        events.emit(PipelineEvent::StageStarted { run_id, stage });

        tokio::spawn(async move {
            let result = work.await;
            // Free the slot before anyone hears about the outcome
            drop(guard);

            match result {
                Ok((value, report)) => {
                    tracing::info!(%run_id, "{} completed", stage);
                    events.emit(PipelineEvent::StageCompleted {
                        run_id,
                        stage,
                        report,
                    });
                    Ok(value)
                }
                Err(e) => {
                    tracing::error!(%run_id, "{} failed: {}", stage, e);
                    events.emit(PipelineEvent::StageFailed {
                        run_id,
                        stage,
                        message: e.to_string(),
                        configuration: e.is_configuration(),
                    });
                    Err(e)
                }
            }
        })
    }

    /// Choose the directory to organize; clears everything derived from the
    /// previous one
    pub fn select_source_directory(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(stage) = self.active_stage() {
            return Err(PipelineError::Busy(stage));
        }
        if !path.is_dir() {
            return Err(PipelineError::InvalidSourceDirectory(path.to_path_buf()));
        }

        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        tracing::info!("Source directory: {}", root.display());

        let mut session = lock(&self.inner.session);
        *session = Session {
            source: Some(root),
            ..Session::default()
        };
        Ok(())
    }

    pub fn source_directory(&self) -> Option<PathBuf> {
        lock(&self.inner.session).source.clone()
    }

    /// Destination root for the current source directory
    pub fn destination(&self) -> Option<PathBuf> {
        self.source_directory()
            .map(|source| self.inner.config.destination_for(&source))
    }

    /// Walk the source directory in the background; resolves to the number
    /// of video files found
    pub fn start_scan(&self) -> Result<StageHandle<usize>, PipelineError> {
        let guard = self.begin(Stage::Scan)?;
        let root = self.source_directory().ok_or(PipelineError::NoSourceDirectory)?;

        let scanner = DirectoryScanner::from_config(&self.inner.config.scanner)
            .with_excluded_dir(self.inner.config.destination_for(&root));

        {
            let mut session = lock(&self.inner.session);
            session.files = None;
            session.scan_warnings.clear();
            session.plan = None;
        }

        let inner = self.inner.clone();
        let cancel = guard.cancel.clone();
        let run_id = guard.run_id;

        Ok(self.spawn_stage(guard, async move {
            let events = inner.events.clone();
            let (files, warnings) = tokio::task::spawn_blocking(move || {
                let mut iter = scanner.scan(&root);
                let mut files = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled(Stage::Scan));
                    }
                    let Some(file) = iter.next() else {
                        break;
                    };
                    events.emit(PipelineEvent::FileDiscovered {
                        run_id,
                        count: files.len() + 1,
                        path: file.absolute_path.clone(),
                    });
                    files.push(file);
                }
                Ok((files, iter.into_warnings()))
            })
            .await
            .map_err(|e| PipelineError::Worker {
                stage: Stage::Scan,
                message: e.to_string(),
            })??;

            let mut files = files;
            apply_season_consensus(&mut files);

            let count = files.len();
            let tagged = files.iter().filter(|f| f.tag().is_some()).count();
            let report = StageReport::Scanned {
                files: count,
                tagged,
                warnings: warnings.len(),
            };
            tracing::info!(
                %run_id,
                "Found {} video files ({} with an episode tag, {} skipped entries)",
                count,
                tagged,
                warnings.len()
            );

            let mut session = lock(&inner.session);
            session.files = Some(files);
            session.scan_warnings = warnings;
            Ok((count, report))
        }))
    }

    pub fn discovered_files(&self) -> Option<Vec<DiscoveredFile>> {
        lock(&self.inner.session).files.clone()
    }

    pub fn scan_warnings(&self) -> Vec<ScanWarning> {
        lock(&self.inner.session).scan_warnings.clone()
    }

    /// Search the provider for series matching `query`
    pub fn search_series(&self, query: &str) -> Result<StageHandle<Vec<SeriesCandidate>>, PipelineError> {
        let guard = self.begin(Stage::Search)?;
        let inner = self.inner.clone();
        let cancel = guard.cancel.clone();
        let query = query.trim().to_string();

        Ok(self.spawn_stage(guard, async move {
            let candidates = inner.provider.search(&query).await?;
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(Stage::Search));
            }

            tracing::info!(
                "{} returned {} candidates for '{}'",
                inner.provider.name(),
                candidates.len(),
                query
            );
            lock(&inner.session).candidates = candidates.clone();
            let report = StageReport::Searched {
                candidates: candidates.len(),
            };
            Ok((candidates, report))
        }))
    }

    /// Candidates of the last successful search
    pub fn candidates(&self) -> Vec<SeriesCandidate> {
        lock(&self.inner.session).candidates.clone()
    }

    /// Fetch the episode list of `candidate`, localizing titles when the
    /// provider's language differs from the target language
    pub fn select_series(
        &self,
        candidate: SeriesCandidate,
    ) -> Result<StageHandle<SeriesSelection>, PipelineError> {
        let guard = self.begin(Stage::FetchEpisodes)?;
        let inner = self.inner.clone();
        let cancel = guard.cancel.clone();

        Ok(self.spawn_stage(guard, async move {
            let mut episodes = inner.provider.fetch_episodes(&candidate.external_id).await?;
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(Stage::FetchEpisodes));
            }

            let needs_translation = language_base(inner.provider.native_language())
                != language_base(&inner.config.language);

            let localization = match &inner.localizer {
                Some(localizer) if needs_translation => {
                    let report = localizer
                        .localize(
                            &mut episodes,
                            &candidate.external_id,
                            inner.provider.id_kind(),
                            &cancel,
                        )
                        .await;
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled(Stage::FetchEpisodes));
                    }
                    if report.is_degraded() {
                        tracing::warn!(
                            "Localization degraded: {} queries failed, {} titles left untranslated",
                            report.failed_queries,
                            report.untranslated
                        );
                    }
                    Some(report)
                }
                _ => None,
            };

            let series_title = localization
                .as_ref()
                .and_then(|r| r.series_title.clone())
                .unwrap_or_else(|| candidate.display_title.clone());

            let selection = SeriesSelection {
                candidate: Some(candidate),
                series_title: series_title.clone(),
                episode_count: episodes.len(),
                localization: localization.clone(),
            };

            {
                let mut session = lock(&inner.session);
                session.series = Some((selection.clone(), EpisodeSource::Provider(episodes)));
                session.plan = None;
            }

            let report = StageReport::SeriesLoaded {
                title: series_title,
                episodes: selection.episode_count,
                localization,
            };
            Ok((selection, report))
        }))
    }

    /// Plan with a typed series name and no provider titles
    ///
    /// Every tagged file resolves to `<Series> - SxxEyy.<ext>`.
    pub fn use_manual_series(&self, name: &str) -> Result<SeriesSelection, PipelineError> {
        if let Some(stage) = self.active_stage() {
            return Err(PipelineError::Busy(stage));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::EmptySeriesName);
        }

        let selection = SeriesSelection {
            candidate: None,
            series_title: name.to_string(),
            episode_count: 0,
            localization: None,
        };
        tracing::info!("Using manual series name '{}'", name);

        let mut session = lock(&self.inner.session);
        session.series = Some((selection.clone(), EpisodeSource::Manual));
        session.plan = None;
        Ok(selection)
    }

    /// Force one season onto every scanned file with an episode number
    ///
    /// Lasts until the next scan. Returns how many files were changed.
    pub fn override_season(&self, season: u32) -> Result<usize, PipelineError> {
        if let Some(stage) = self.active_stage() {
            return Err(PipelineError::Busy(stage));
        }

        let mut session = lock(&self.inner.session);
        let files = session.files.as_mut().ok_or(PipelineError::NotScanned)?;
        let mut changed = 0;
        for file in files.iter_mut().filter(|f| f.tag().is_some()) {
            file.parsed_season = Some(season);
            file.season_source = Some(SeasonSource::Override);
            changed += 1;
        }
        session.plan = None;

        tracing::info!("Season forced to {} for {} file(s)", season, changed);
        Ok(changed)
    }

    pub fn selected_series(&self) -> Option<SeriesSelection> {
        lock(&self.inner.session)
            .series
            .as_ref()
            .map(|(selection, _)| selection.clone())
    }

    /// Build (or rebuild) the rename plan from the scanned files and the
    /// selected series
    pub fn plan_preview(&self) -> Result<Vec<PlanEntry>, PipelineError> {
        let mut session = lock(&self.inner.session);
        let files = session.files.as_ref().ok_or(PipelineError::NotScanned)?;
        let (selection, source) = session
            .series
            .as_ref()
            .ok_or(PipelineError::NoSeriesSelected)?;

        let plan = match source {
            EpisodeSource::Provider(episodes) => build_plan(files, episodes, &selection.series_title),
            EpisodeSource::Manual => build_plan(
                files,
                &untitled_episodes(files, &self.inner.config.language),
                &selection.series_title,
            ),
        };
        let summary = PlanSummary::from_plan(&plan);
        tracing::info!(
            "Plan: {} resolved ({} from ambiguous names), {} without match, {} duplicates, {} untagged",
            summary.resolved,
            summary.resolved_ambiguous,
            summary.no_match,
            summary.duplicate,
            summary.invalid_tag
        );

        session.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Materialize the current plan under the destination root
    ///
    /// A cancelled run still resolves to a full result list; entries not
    /// reached are skipped.
    pub fn start_execution(
        &self,
        mode: TransferMode,
    ) -> Result<StageHandle<Vec<ExecutionResult>>, PipelineError> {
        let guard = self.begin(Stage::Execute)?;
        let (plan, source) = {
            let session = lock(&self.inner.session);
            let plan = session.plan.clone().ok_or(PipelineError::NoPlan)?;
            let source = session.source.clone().ok_or(PipelineError::NoSourceDirectory)?;
            (plan, source)
        };
        let dest = self.inner.config.destination_for(&source);

        let inner = self.inner.clone();
        let cancel = guard.cancel.clone();
        let run_id = guard.run_id;

        Ok(self.spawn_stage(guard, async move {
            tracing::info!(%run_id, "Writing {} entries to {} ({})", plan.len(), dest.display(), mode);
            let events = inner.events.clone();
            let results = executor::execute(&plan, &dest, mode, &cancel, |done, total, result| {
                events.emit(PipelineEvent::EntryProcessed {
                    run_id,
                    done,
                    total,
                    result: result.clone(),
                });
            })
            .await;

            let summary = ExecutionSummary::from_results(&results);
            lock(&inner.session).results = results.clone();
            Ok((results, StageReport::Executed(summary)))
        }))
    }

    /// Results of the last execution
    pub fn execution_results(&self) -> Vec<ExecutionResult> {
        lock(&self.inner.session).results.clone()
    }
}
