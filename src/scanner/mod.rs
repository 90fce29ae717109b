// Directory scanning: discovers video files and tags them with season/episode

pub mod parser;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::models::{DiscoveredFile, ParseConfidence, SeasonSource};
use parser::{parse_with_season_hint, season_from_text};

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "avi", "mp4", "m4v", "wmv", "flv", "mov", "mpg", "mpeg", "ts", "webm", "ogv", "divx",
    "xvid", "3gp", "asf", "vob", "rm", "rmvb",
];

/// Something the scanner had to skip
#[derive(Debug, Clone)]
pub struct ScanWarning {
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    /// Allowed extensions, lowercase without the dot
    pub video_extensions: Vec<String>,
    /// Directories that are never descended into (e.g. the output folder)
    pub excluded_dirs: Vec<PathBuf>,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self {
            video_extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            excluded_dirs: Vec::new(),
        }
    }
}

impl DirectoryScanner {
    pub fn from_config(config: &ScannerConfig) -> Self {
        let mut scanner = Self::default();
        if !config.video_extensions.is_empty() {
            scanner = scanner.with_extensions(config.video_extensions.clone());
        }
        for dir in &config.excluded_dirs {
            scanner = scanner.with_excluded_dir(dir.clone());
        }
        scanner
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.video_extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn with_excluded_dir(mut self, dir: PathBuf) -> Self {
        self.excluded_dirs.push(dir);
        self
    }

    pub fn is_video_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.video_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Start a fresh walk of `root`
    ///
    /// The returned iterator is lazy; calling `scan` again re-walks from scratch.
    pub fn scan(&self, root: &Path) -> ScanIter {
        let excluded = self
            .excluded_dirs
            .iter()
            .filter_map(|dir| std::fs::canonicalize(dir).ok())
            .collect();

        ScanIter {
            scanner: self.clone(),
            root: root.to_path_buf(),
            walker: WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter(),
            excluded,
            visited_dirs: HashSet::new(),
            seen_files: HashSet::new(),
            next_index: 0,
            warnings: Vec::new(),
        }
    }

    /// Build the `DiscoveredFile` for one admitted video file
    fn discover(&self, root: &Path, path: &Path, size_bytes: u64, index: usize) -> DiscoveredFile {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let hint = season_hint(path, root);

        // Season-per-folder layouts: the folder name carries the marker
        let tag = parse_with_season_hint(&file_name, hint).or_else(|| {
            let parent = path.parent()?.file_name()?.to_string_lossy();
            parse_with_season_hint(&format!("{} {}", parent, file_name), hint)
        });

        match tag {
            Some(tag) => DiscoveredFile {
                absolute_path: path.to_path_buf(),
                size_bytes,
                extension,
                parsed_season: Some(tag.season),
                parsed_episode: Some(tag.episode),
                parse_confidence: tag.confidence,
                matched_rule: Some(tag.rule),
                season_source: Some(tag.season_source),
                discovery_index: index,
            },
            None => {
                tracing::debug!("Could not parse episode info from: {}", file_name);
                DiscoveredFile {
                    absolute_path: path.to_path_buf(),
                    size_bytes,
                    extension,
                    parsed_season: None,
                    parsed_episode: None,
                    parse_confidence: ParseConfidence::None,
                    matched_rule: None,
                    season_source: None,
                    discovery_index: index,
                }
            }
        }
    }
}

/// Look for a season marker in the folders between the file and the root,
/// then in the root folder name itself
fn season_hint(path: &Path, root: &Path) -> Option<u32> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root {
            break;
        }
        if let Some(season) = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(season_from_text)
        {
            return Some(season);
        }
        current = dir.parent();
    }

    root.file_name()
        .and_then(|n| n.to_str())
        .and_then(season_from_text)
}

/// Give season-less files the season every other tagged file agrees on
///
/// Only files whose season fell back to the default are touched, and only
/// when the files with a known season all share one. Returns how many
/// files changed.
pub fn apply_season_consensus(files: &mut [DiscoveredFile]) -> usize {
    let known: HashSet<u32> = files
        .iter()
        .filter(|f| f.tag().is_some() && f.season_source != Some(SeasonSource::Default))
        .filter_map(|f| f.parsed_season)
        .collect();
    if known.len() != 1 {
        return 0;
    }
    let Some(&consensus) = known.iter().next() else {
        return 0;
    };

    let mut changed = 0;
    for file in files
        .iter_mut()
        .filter(|f| f.tag().is_some() && f.season_source == Some(SeasonSource::Default))
    {
        file.parsed_season = Some(consensus);
        file.season_source = Some(SeasonSource::Consensus);
        changed += 1;
    }
    if changed > 0 {
        tracing::info!("Assigned season {} to {} file(s) from their siblings", consensus, changed);
    }
    changed
}

/// Lazy walk over one source tree
pub struct ScanIter {
    scanner: DirectoryScanner,
    root: PathBuf,
    walker: walkdir::IntoIter,
    excluded: Vec<PathBuf>,
    visited_dirs: HashSet<PathBuf>,
    seen_files: HashSet<PathBuf>,
    next_index: usize,
    warnings: Vec<ScanWarning>,
}

impl ScanIter {
    /// Entries skipped during the walk (permission errors, broken links, loops)
    pub fn into_warnings(self) -> Vec<ScanWarning> {
        self.warnings
    }

    fn warn(&mut self, path: Option<PathBuf>, message: String) {
        match &path {
            Some(p) => tracing::warn!("Skipping {}: {}", p.display(), message),
            None => tracing::warn!("Skipping entry: {}", message),
        }
        self.warnings.push(ScanWarning { path, message });
    }
}

impl Iterator for ScanIter {
    type Item = DiscoveredFile;

    fn next(&mut self) -> Option<DiscoveredFile> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf);
                    self.warn(path, err.to_string());
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                let real = match std::fs::canonicalize(entry.path()) {
                    Ok(real) => real,
                    Err(e) => {
                        self.warn(Some(entry.path().to_path_buf()), e.to_string());
                        self.walker.skip_current_dir();
                        continue;
                    }
                };

                if self.excluded.contains(&real) {
                    tracing::debug!("Skipping excluded folder: {}", entry.path().display());
                    self.walker.skip_current_dir();
                    continue;
                }

                // A directory reached twice through symlinks is walked once
                if !self.visited_dirs.insert(real) {
                    tracing::debug!("Already visited: {}", entry.path().display());
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() || !self.scanner.is_video_file(entry.path()) {
                continue;
            }

            if let Ok(real) = std::fs::canonicalize(entry.path()) {
                if !self.seen_files.insert(real) {
                    continue;
                }
            }

            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    self.warn(Some(entry.path().to_path_buf()), e.to_string());
                    continue;
                }
            };

            let index = self.next_index;
            self.next_index += 1;
            return Some(
                self.scanner
                    .discover(&self.root, entry.path(), size_bytes, index),
            );
        }
    }
}
