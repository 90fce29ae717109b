// Executor: materializes a plan as copies or hard links under the destination
// Source files are only ever read.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::models::{ExecutionResult, Outcome, PlanEntry, PlanStatus, TransferMode};

/// Per-run accounting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub copied: usize,
    pub linked: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecutionSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                Outcome::Copied => summary.copied += 1,
                Outcome::Linked => summary.linked += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Execute every entry of `plan` in order
///
/// Only resolved entries touch the filesystem. A failing entry is recorded
/// and the batch continues. `on_progress(done, total, result)` runs after each
/// entry. Once `cancel` fires, the entries not yet reached are recorded as
/// skipped.
pub async fn execute<F>(
    plan: &[PlanEntry],
    dest_root: &Path,
    mode: TransferMode,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Vec<ExecutionResult>
where
    F: FnMut(usize, usize, &ExecutionResult),
{
    let total = plan.len();
    let mut results = Vec::with_capacity(total);

    for (idx, entry) in plan.iter().enumerate() {
        let result = if cancel.is_cancelled() {
            skipped(entry, "cancelled")
        } else {
            execute_entry(entry, dest_root, mode).await
        };

        if result.outcome == Outcome::Failed {
            tracing::warn!(
                "Failed to materialize {}: {}",
                entry.source_file.absolute_path.display(),
                result.error_detail.as_deref().unwrap_or("unknown error")
            );
        }

        on_progress(idx + 1, total, &result);
        results.push(result);
    }

    let summary = ExecutionSummary::from_results(&results);
    tracing::info!(
        "Execution finished: {} copied, {} linked, {} skipped, {} failed",
        summary.copied,
        summary.linked,
        summary.skipped,
        summary.failed
    );
    results
}

async fn execute_entry(entry: &PlanEntry, dest_root: &Path, mode: TransferMode) -> ExecutionResult {
    let relative = match (&entry.status, &entry.target_relative_path) {
        (PlanStatus::Resolved, Some(relative)) => relative,
        (status, _) => return skipped(entry, &status.to_string()),
    };

    let source = &entry.source_file.absolute_path;
    let target = dest_root.join(relative);

    if let Some(parent) = target.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            return failed(entry, format!("cannot create {}: {}", parent.display(), e));
        }
    }

    // Never overwrite: same size means a previous run already did this
    match fs::metadata(&target).await {
        Ok(existing) if existing.len() == entry.source_file.size_bytes => {
            return skipped(entry, "already exists");
        }
        Ok(existing) => {
            return failed(
                entry,
                format!(
                    "collision: {} exists with a different size ({} bytes, source {} bytes)",
                    target.display(),
                    existing.len(),
                    entry.source_file.size_bytes
                ),
            );
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return failed(entry, format!("cannot inspect {}: {}", target.display(), e)),
    }

    match mode {
        TransferMode::Copy => match copy_via_partial(source, &target).await {
            Ok(()) => done(entry, Outcome::Copied, None),
            Err(e) => failed(entry, format!("copy failed: {}", e)),
        },
        TransferMode::HardLink => {
            let linked = fs::hard_link(source, &target).await;
            finish_link(entry, source, &target, linked).await
        }
    }
}

/// Turn a hard link attempt into a result, copying when the volumes differ
async fn finish_link(
    entry: &PlanEntry,
    source: &Path,
    target: &Path,
    linked: io::Result<()>,
) -> ExecutionResult {
    match linked {
        Ok(()) => done(entry, Outcome::Linked, None),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                "Hard link across volumes not possible for {}, copying",
                source.display()
            );
            match copy_via_partial(source, target).await {
                Ok(()) => done(
                    entry,
                    Outcome::Copied,
                    Some("hard link across volumes not possible; copied instead".to_string()),
                ),
                Err(e) => failed(entry, format!("copy fallback failed: {}", e)),
            }
        }
        Err(e) => failed(entry, format!("hard link failed: {}", e)),
    }
}

/// Copy to a hidden sibling, then rename into place
async fn copy_via_partial(source: &Path, target: &Path) -> io::Result<()> {
    let partial = partial_path(target);

    let result = async {
        fs::copy(source, &partial).await?;
        fs::rename(&partial, target).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&partial).await;
    }
    result
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

/// EXDEV on Unix, ERROR_NOT_SAME_DEVICE on Windows
fn is_cross_device(err: &io::Error) -> bool {
    let code = if cfg!(windows) { 17 } else { 18 };
    err.raw_os_error() == Some(code)
}

fn done(entry: &PlanEntry, outcome: Outcome, detail: Option<String>) -> ExecutionResult {
    ExecutionResult {
        entry: entry.clone(),
        outcome,
        error_detail: detail,
    }
}

fn skipped(entry: &PlanEntry, reason: &str) -> ExecutionResult {
    done(entry, Outcome::Skipped, Some(reason.to_string()))
}

fn failed(entry: &PlanEntry, detail: String) -> ExecutionResult {
    done(entry, Outcome::Failed, Some(detail))
}
