// Plan builder: joins discovered files against the episode map

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::models::{
    DiscoveredFile, EpisodeMap, EpisodeRecord, ParseConfidence, PlanEntry, PlanStatus,
};

const UNKNOWN_SERIES: &str = "Unknown Series";

static RE_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f\x7f]"#).unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Make a string safe to use as a single path component
///
/// Removes `\ / : * ? " < > |` and control characters, collapses whitespace
/// and trims trailing dots and spaces.
pub fn sanitize_component(value: &str) -> String {
    let cleaned = RE_FORBIDDEN.replace_all(value, "");
    let collapsed = RE_WHITESPACE.replace_all(&cleaned, " ");
    collapsed
        .trim()
        .trim_end_matches(['.', ' '])
        .to_string()
}

/// Relative target path for one episode
pub fn target_path(series_title: &str, season: u32, episode: u32, title: &str, extension: &str) -> PathBuf {
    let series = match sanitize_component(series_title) {
        s if s.is_empty() => UNKNOWN_SERIES.to_string(),
        s => s,
    };
    let title = sanitize_component(title);
    let extension = sanitize_component(extension);

    let stem = if title.is_empty() {
        format!("{} - S{:02}E{:02}", series, season, episode)
    } else {
        format!("{} - S{:02}E{:02} - {}", series, season, episode, title)
    };
    let file_name = if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    };

    Path::new(&series)
        .join(format!("Season {:02}", season))
        .join(file_name)
}

/// Build one plan entry per discovered file
///
/// The result is in input order and depends only on the inputs. Among
/// resolved entries sharing a target, the largest file wins and ties go to
/// the earliest discovered; the others become `DuplicateTarget`.
pub fn build_plan(files: &[DiscoveredFile], episodes: &EpisodeMap, series_title: &str) -> Vec<PlanEntry> {
    let mut plan: Vec<PlanEntry> = files
        .iter()
        .map(|file| {
            let Some(key) = file.tag() else {
                return PlanEntry {
                    source_file: file.clone(),
                    target_relative_path: None,
                    status: PlanStatus::InvalidSourceTag,
                };
            };

            match episodes.get(&key) {
                Some(record) => PlanEntry {
                    source_file: file.clone(),
                    target_relative_path: Some(target_path(
                        series_title,
                        key.0,
                        key.1,
                        &record.title,
                        &file.extension,
                    )),
                    status: PlanStatus::Resolved,
                },
                None => PlanEntry {
                    source_file: file.clone(),
                    target_relative_path: None,
                    status: PlanStatus::NoMatch,
                },
            }
        })
        .collect();

    // Winner per target: (size, earliest discovery) ordering
    let mut winners: HashMap<PathBuf, usize> = HashMap::new();
    for (idx, entry) in plan.iter().enumerate() {
        let Some(target) = &entry.target_relative_path else {
            continue;
        };
        winners
            .entry(target.clone())
            .and_modify(|best| {
                if beats(&entry.source_file, &plan[*best].source_file) {
                    *best = idx;
                }
            })
            .or_insert(idx);
    }

    for (idx, entry) in plan.iter_mut().enumerate() {
        let Some(target) = &entry.target_relative_path else {
            continue;
        };
        if winners.get(target) != Some(&idx) {
            tracing::debug!(
                "Duplicate target for {}: {}",
                entry.source_file.file_name(),
                target.display()
            );
            entry.status = PlanStatus::DuplicateTarget;
            entry.target_relative_path = None;
        }
    }

    plan
}

/// Episode map with one untitled record per tag found in `files`
///
/// Used when the series name is typed in rather than looked up.
pub fn untitled_episodes(files: &[DiscoveredFile], language: &str) -> EpisodeMap {
    files
        .iter()
        .filter_map(DiscoveredFile::tag)
        .map(|(season, episode)| {
            (
                (season, episode),
                EpisodeRecord {
                    season,
                    episode,
                    title: String::new(),
                    source_language: language.to_string(),
                    external_id: None,
                },
            )
        })
        .collect()
}

fn beats(candidate: &DiscoveredFile, current: &DiscoveredFile) -> bool {
    candidate.size_bytes > current.size_bytes
        || (candidate.size_bytes == current.size_bytes
            && candidate.discovery_index < current.discovery_index)
}

/// Counts per plan status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub resolved: usize,
    pub no_match: usize,
    pub duplicate: usize,
    pub invalid_tag: usize,
    /// Resolved entries whose tag came from an ambiguous rule
    pub resolved_ambiguous: usize,
}

impl PlanSummary {
    pub fn from_plan(plan: &[PlanEntry]) -> Self {
        let mut summary = Self::default();
        for entry in plan {
            match entry.status {
                PlanStatus::Resolved => {
                    summary.resolved += 1;
                    if entry.source_file.parse_confidence == ParseConfidence::Ambiguous {
                        summary.resolved_ambiguous += 1;
                    }
                }
                PlanStatus::NoMatch => summary.no_match += 1,
                PlanStatus::DuplicateTarget => summary.duplicate += 1,
                PlanStatus::InvalidSourceTag => summary.invalid_tag += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.resolved + self.no_match + self.duplicate + self.invalid_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchRule, SeasonSource};

    fn file(name: &str, size: u64, index: usize, tag: Option<(u32, u32)>) -> DiscoveredFile {
        let path = PathBuf::from("/downloads").join(name);
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        DiscoveredFile {
            absolute_path: path,
            size_bytes: size,
            extension,
            parsed_season: tag.map(|t| t.0),
            parsed_episode: tag.map(|t| t.1),
            parse_confidence: if tag.is_some() {
                ParseConfidence::Exact
            } else {
                ParseConfidence::None
            },
            matched_rule: tag.map(|_| MatchRule::SeasonEpisode),
            season_source: tag.map(|_| SeasonSource::FileName),
            discovery_index: index,
        }
    }

    fn episodes(entries: &[((u32, u32), &str)]) -> EpisodeMap {
        entries
            .iter()
            .map(|(key, title)| {
                (
                    *key,
                    EpisodeRecord {
                        season: key.0,
                        episode: key.1,
                        title: title.to_string(),
                        source_language: "es-ES".to_string(),
                        external_id: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_resolved_target_layout() {
        let files = vec![file("Show.Name.S01E01.Pilot.mkv", 10, 0, Some((1, 1)))];
        let map = episodes(&[((1, 1), "Episodio Piloto")]);

        let plan = build_plan(&files, &map, "Mi Serie");
        assert_eq!(plan[0].status, PlanStatus::Resolved);
        assert_eq!(
            plan[0].target_relative_path,
            Some(PathBuf::from(
                "Mi Serie/Season 01/Mi Serie - S01E01 - Episodio Piloto.mkv"
            ))
        );
    }

    #[test]
    fn test_unmatched_and_untagged() {
        let files = vec![
            file("Show.S01E05.mkv", 10, 0, Some((1, 5))),
            file("holiday.mkv", 10, 1, None),
        ];
        let map = episodes(&[((1, 1), "Pilot")]);

        let plan = build_plan(&files, &map, "Show");
        assert_eq!(plan[0].status, PlanStatus::NoMatch);
        assert_eq!(plan[0].target_relative_path, None);
        assert_eq!(plan[1].status, PlanStatus::InvalidSourceTag);
    }

    #[test]
    fn test_largest_duplicate_wins() {
        let files = vec![
            file("sample.S01E01.mkv", 1_000_000, 0, Some((1, 1))),
            file("Show.S01E01.mkv", 100_000_000, 1, Some((1, 1))),
        ];
        let map = episodes(&[((1, 1), "Pilot")]);

        let plan = build_plan(&files, &map, "Show");
        assert_eq!(plan[0].status, PlanStatus::DuplicateTarget);
        assert_eq!(plan[0].target_relative_path, None);
        assert_eq!(plan[1].status, PlanStatus::Resolved);
    }

    #[test]
    fn test_equal_size_tie_goes_to_earliest() {
        let files = vec![
            file("b.S01E01.mkv", 5, 1, Some((1, 1))),
            file("a.S01E01.mkv", 5, 0, Some((1, 1))),
        ];
        let map = episodes(&[((1, 1), "Pilot")]);

        let plan = build_plan(&files, &map, "Show");
        assert_eq!(plan[0].status, PlanStatus::DuplicateTarget);
        assert_eq!(plan[1].status, PlanStatus::Resolved);
    }

    #[test]
    fn test_different_extensions_are_different_targets() {
        let files = vec![
            file("Show.S01E01.mkv", 5, 0, Some((1, 1))),
            file("Show.S01E01.avi", 5, 1, Some((1, 1))),
        ];
        let map = episodes(&[((1, 1), "Pilot")]);

        let plan = build_plan(&files, &map, "Show");
        assert!(plan.iter().all(|e| e.status == PlanStatus::Resolved));
    }

    #[test]
    fn test_build_plan_is_deterministic() {
        let files = vec![
            file("x.S01E01.mkv", 3, 0, Some((1, 1))),
            file("y.S01E01.mkv", 3, 1, Some((1, 1))),
            file("z.S01E02.mkv", 3, 2, Some((1, 2))),
            file("junk.mkv", 3, 3, None),
        ];
        let map = episodes(&[((1, 1), "Uno"), ((1, 2), "Dos")]);

        let first = build_plan(&files, &map, "Serie");
        let second = build_plan(&files, &map, "Serie");
        assert_eq!(first, second);
    }

    #[test]
    fn test_untitled_episodes_resolve_every_tag() {
        let files = vec![
            file("Serie Capitulo 01.avi", 5, 0, Some((1, 1))),
            file("Serie Capitulo 02.avi", 5, 1, Some((1, 2))),
            file("extras.avi", 5, 2, None),
        ];
        let map = untitled_episodes(&files, "es-ES");
        assert_eq!(map.len(), 2);

        let plan = build_plan(&files, &map, "Mi Serie");
        assert_eq!(
            plan[1].target_relative_path,
            Some(PathBuf::from("Mi Serie/Season 01/Mi Serie - S01E02.avi"))
        );
        assert_eq!(plan[2].status, PlanStatus::InvalidSourceTag);
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("What? Why: Now*"), "What Why Now");
        assert_eq!(sanitize_component("a/b\\c|d"), "abcd");
        assert_eq!(sanitize_component("  spaced \t out  "), "spaced out");
        assert_eq!(sanitize_component("Ends with dots..."), "Ends with dots");
        assert_eq!(sanitize_component("tab\u{7}bell"), "tabbell");
    }

    #[test]
    fn test_fallback_names() {
        assert_eq!(
            target_path("", 2, 3, "", "mkv"),
            PathBuf::from("Unknown Series/Season 02/Unknown Series - S02E03.mkv")
        );
        assert_eq!(
            target_path("Show: Part 1", 1, 12, "\"Quoted\"", "mp4"),
            PathBuf::from("Show Part 1/Season 01/Show Part 1 - S01E12 - Quoted.mp4")
        );
    }

    #[test]
    fn test_plan_summary_counts() {
        let mut ambiguous = file("101 - x.avi", 5, 2, Some((1, 1)));
        ambiguous.parse_confidence = ParseConfidence::Ambiguous;
        let files = vec![
            file("Show.S01E02.mkv", 5, 0, Some((1, 2))),
            file("none.mkv", 5, 1, None),
            ambiguous,
            file("Show.S09E09.mkv", 5, 3, Some((9, 9))),
        ];
        let map = episodes(&[((1, 1), "Uno"), ((1, 2), "Dos")]);

        let summary = PlanSummary::from_plan(&build_plan(&files, &map, "Show"));
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.resolved_ambiguous, 1);
        assert_eq!(summary.invalid_tag, 1);
        assert_eq!(summary.no_match, 1);
        assert_eq!(summary.total(), 4);
    }
}
