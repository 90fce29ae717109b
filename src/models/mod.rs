use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// How sure the parser is about a file's episode tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseConfidence {
    Exact,
    Ambiguous,
    None,
}

/// Which family of filename rules produced a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRule {
    SeasonEpisode,
    Cross,
    EpisodeMarker,
    BareNumber,
}

/// Where a file's season number came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeasonSource {
    /// Written in the file name (`S02E05`, `2x05`, `205`)
    FileName,
    /// A `Season N` style folder between the file and the root, or the root
    Folder,
    /// Every other tagged file of the scan agreed on one season
    Consensus,
    /// Nothing said otherwise
    Default,
    /// Forced by the user for the whole scan
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeTag {
    pub season: u32,
    pub episode: u32,
    pub rule: MatchRule,
    pub confidence: ParseConfidence,
    pub season_source: SeasonSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase, without the leading dot
    pub extension: String,
    pub parsed_season: Option<u32>,
    pub parsed_episode: Option<u32>,
    pub parse_confidence: ParseConfidence,
    pub matched_rule: Option<MatchRule>,
    pub season_source: Option<SeasonSource>,
    /// Position in the scan order, used for deterministic tie-breaks
    pub discovery_index: usize,
}

impl DiscoveredFile {
    pub fn tag(&self) -> Option<(u32, u32)> {
        if self.parse_confidence == ParseConfidence::None {
            return None;
        }
        Some((self.parsed_season?, self.parsed_episode?))
    }

    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCandidate {
    pub external_id: String,
    pub display_title: String,
    pub first_air_year: Option<i32>,
    pub original_title: Option<String>,
    pub overview: Option<String>,
}

impl fmt::Display for SeriesCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_air_year {
            Some(year) => write!(f, "{} ({})", self.display_title, year),
            None => write!(f, "{}", self.display_title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub season: u32,
    pub episode: u32,
    pub title: String,
    pub source_language: String,
    /// Per-episode id in the provider's namespace, when it publishes one
    pub external_id: Option<String>,
}

/// Episode list of one series, keyed by (season, episode)
pub type EpisodeMap = BTreeMap<(u32, u32), EpisodeRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Resolved,
    NoMatch,
    DuplicateTarget,
    InvalidSourceTag,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Resolved => write!(f, "resolved"),
            PlanStatus::NoMatch => write!(f, "no matching episode"),
            PlanStatus::DuplicateTarget => write!(f, "duplicate target"),
            PlanStatus::InvalidSourceTag => write!(f, "no season/episode in file name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub source_file: DiscoveredFile,
    pub target_relative_path: Option<PathBuf>,
    pub status: PlanStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    Copy,
    HardLink,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::HardLink => write!(f, "hardlink"),
        }
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "hardlink" | "hard-link" | "link" => Ok(TransferMode::HardLink),
            other => Err(format!("unknown transfer mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Copied,
    Linked,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub entry: PlanEntry,
    pub outcome: Outcome,
    pub error_detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_requires_confidence() {
        let mut file = DiscoveredFile {
            absolute_path: PathBuf::from("/src/a.mkv"),
            size_bytes: 1,
            extension: "mkv".to_string(),
            parsed_season: Some(1),
            parsed_episode: Some(2),
            parse_confidence: ParseConfidence::Ambiguous,
            matched_rule: Some(MatchRule::BareNumber),
            season_source: Some(SeasonSource::Default),
            discovery_index: 0,
        };
        assert_eq!(file.tag(), Some((1, 2)));

        file.parse_confidence = ParseConfidence::None;
        assert_eq!(file.tag(), None);
    }

    #[test]
    fn test_transfer_mode_from_str() {
        assert_eq!("Copy".parse::<TransferMode>(), Ok(TransferMode::Copy));
        assert_eq!(
            "hard-link".parse::<TransferMode>(),
            Ok(TransferMode::HardLink)
        );
        assert!("move".parse::<TransferMode>().is_err());
    }
}
