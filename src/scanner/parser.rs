// Filename parsing: season/episode extraction and series name guessing

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{EpisodeTag, MatchRule, ParseConfidence, SeasonSource};

// Explicit season + episode, most specific first
static RE_SEASON_EP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)s(\d{1,2})[\s._-]*e(\d{1,3})(?:\D|$)").unwrap());
static RE_CROSS_EP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{1,2})[xX](\d{1,3})(?:\D|$)").unwrap());
static RE_TEMP_EP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^\p{L}])t(\d{1,2})[\s._-]*e(\d{1,3})(?:\D|$)").unwrap());
static RE_SEASON_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)season[\s._-]*(\d{1,2})[\s._-]*(?:[-–—][\s._-]*)?episode[\s._-]*(\d{1,3})(?:\D|$)")
        .unwrap()
});
static RE_TEMPORADA_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)t(?:emporada|emp)[\s._-]*(\d{1,2})[\s._-]*(?:[-–—][\s._-]*)?(?:cap(?:[ií]tulo)?|e(?:p(?:isodio)?)?)[\s._-]*(\d{1,3})(?:\D|$)",
    )
    .unwrap()
});

// Episode-only markers; season comes from the hint or defaults to 1
static RE_CHAPTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^\p{L}])cap(?:[ií]tulo)?[\s._-]*(\d{1,4})").unwrap());
static RE_EPISODE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^\p{L}])ep(?:isodio|isode)?[\s._-]*(\d{1,4})").unwrap()
});
static RE_STANDALONE_E: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\p{L}\d])[Ee](\d{2,3})(?:[\s._\-\[\(]|$)").unwrap()
});

// Bare numbers, last resort
static RE_DASH_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\-–—]\s*(\d{2,4})(?:[\s._\[\(]|$)").unwrap());
static RE_BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s._\-])(\d{2,4})(?:[\s._\-\[\(]|$)").unwrap());

static RE_SEASON_HINT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:season|temporada|temp)[\s.]*?(\d{1,2})").unwrap());
static RE_SEASON_HINT_S: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bs(\d{1,2})\b").unwrap());
static RE_SEASON_HINT_T: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bt(\d{1,2})\b").unwrap());

static RE_NAME_CUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[st]\d{1,2}[\s._-]*e\d|\d{1,2}x\d{1,3}|t(?:emporada|emp)[\s._-]*\d|cap(?:i(?:tulo)?)?[\s._-]*\d",
    )
    .unwrap()
});
static RE_NAME_SEASON_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:season\s*\d{1,2}|[st]\d{1,2})\b").unwrap());
static RE_NAME_JUNK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:720p|1080p|2160p|4k|uhd|bluray|bdrip|brrip|webrip|web-dl|webdl|hdtv|dvdrip|hdrip|x264|x265|h\.?264|h\.?265|hevc|avc|aac|ac3|dts|flac|mp3|proper|repack|internal|real|multi|dual|spanish|english|latino|castellano|spa|eng)\b|\[.*?\]|\(.*?\)|\{.*?\}",
    )
    .unwrap()
});
static RE_GROUP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s-[A-Za-z0-9]+$").unwrap());
static RE_SPACE_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const RESOLUTION_NUMBERS: &[u32] = &[480, 576, 720, 1080, 2160, 4320];
const CODEC_NUMBERS: &[u32] = &[264, 265];

/// Parse a season/episode tag out of a file name, using `season_hint` for
/// rules that only carry an episode
///
/// Season-less markers ("Capitulo 5", "E05") fall back to season 1 when
/// there is no hint. Rules are tried in priority order and the first rule that matches wins,
/// wherever in the name the match sits.
pub fn parse_with_season_hint(filename: &str, season_hint: Option<u32>) -> Option<EpisodeTag> {
    let name = strip_extension(filename);

    for (re, rule) in [
        (&*RE_SEASON_EP, MatchRule::SeasonEpisode),
        (&*RE_CROSS_EP, MatchRule::Cross),
        (&*RE_TEMP_EP, MatchRule::SeasonEpisode),
        (&*RE_SEASON_WORDS, MatchRule::SeasonEpisode),
        (&*RE_TEMPORADA_WORDS, MatchRule::SeasonEpisode),
    ] {
        if let Some(caps) = re.captures(name) {
            let season: u32 = caps.get(1)?.as_str().parse().ok()?;
            let episode: u32 = caps.get(2)?.as_str().parse().ok()?;
            return Some(EpisodeTag {
                season,
                episode,
                rule,
                confidence: ParseConfidence::Exact,
                season_source: SeasonSource::FileName,
            });
        }
    }

    for (re, rule) in [
        (&*RE_CHAPTER, MatchRule::EpisodeMarker),
        (&*RE_EPISODE_WORD, MatchRule::EpisodeMarker),
        (&*RE_STANDALONE_E, MatchRule::EpisodeMarker),
        (&*RE_DASH_NUMBER, MatchRule::BareNumber),
        (&*RE_BARE_NUMBER, MatchRule::BareNumber),
    ] {
        if let Some(tag) = first_episode_number(re, name, rule, season_hint) {
            return Some(tag);
        }
    }

    None
}

/// Walk every match of an episode-only rule, skipping numbers that are really
/// years, resolutions or codec tags
fn first_episode_number(
    re: &Regex,
    name: &str,
    rule: MatchRule,
    season_hint: Option<u32>,
) -> Option<EpisodeTag> {
    let mut start = 0;
    while start <= name.len() {
        let caps = re.captures_at(name, start)?;
        let number = caps.get(1)?;
        start = number.end();

        let raw = number.as_str();
        let Ok(value) = raw.parse::<u32>() else {
            continue;
        };
        if is_false_positive(value, raw) {
            continue;
        }
        if let Some(tag) = split_episode_number(raw, value, rule, season_hint) {
            return Some(tag);
        }
    }
    None
}

fn is_false_positive(value: u32, raw: &str) -> bool {
    if raw.len() == 4 && (1950..=2030).contains(&value) {
        return true;
    }
    RESOLUTION_NUMBERS.contains(&value) || CODEC_NUMBERS.contains(&value)
}

/// Turn a bare number into a tag
///
/// - 4 digits: `1205` → S12E05
/// - 3 digits: `401` → S04E01 when the episode part is 1–50, otherwise the
///   whole number is an absolute episode of the hinted season
/// - 1–2 digits: episode of the hinted season
fn split_episode_number(
    raw: &str,
    value: u32,
    rule: MatchRule,
    season_hint: Option<u32>,
) -> Option<EpisodeTag> {
    let (default_season, default_source) = match season_hint {
        Some(season) => (season, SeasonSource::Folder),
        None => (1, SeasonSource::Default),
    };
    let marker_confidence = match rule {
        MatchRule::BareNumber => ParseConfidence::Ambiguous,
        _ => ParseConfidence::Exact,
    };

    let (season, episode, confidence, season_source) = match raw.len() {
        4 => {
            let (season, episode) = (value / 100, value % 100);
            if season == 0 || episode == 0 {
                return None;
            }
            (season, episode, ParseConfidence::Ambiguous, SeasonSource::FileName)
        }
        3 => {
            let (season, episode) = (value / 100, value % 100);
            if season >= 1 && (1..=50).contains(&episode) {
                (season, episode, ParseConfidence::Ambiguous, SeasonSource::FileName)
            } else {
                (default_season, value, ParseConfidence::Ambiguous, default_source)
            }
        }
        _ => {
            if value == 0 {
                return None;
            }
            (default_season, value, marker_confidence, default_source)
        }
    };

    Some(EpisodeTag {
        season,
        episode,
        rule,
        confidence,
        season_source,
    })
}

/// Drop a trailing file extension, leaving names like "Season.1" alone
fn strip_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => filename,
    }
}

/// Find a season number in a folder name ("Season 4", "Temporada 2", "S03", "T2")
pub fn season_from_text(text: &str) -> Option<u32> {
    for re in [&*RE_SEASON_HINT_WORD, &*RE_SEASON_HINT_S, &*RE_SEASON_HINT_T] {
        if let Some(caps) = re.captures(text) {
            let value: u32 = caps.get(1)?.as_str().parse().ok()?;
            if (1..=50).contains(&value) {
                return Some(value);
            }
        }
    }
    None
}

/// Derive a search query from a series folder name
/// e.g. "Breaking.Bad.S02.720p.BluRay.x264-GRP" -> "Breaking Bad"
pub fn guess_series_name(folder_name: &str) -> String {
    let name = match RE_NAME_CUT.find(folder_name) {
        Some(m) => &folder_name[..m.start()],
        None => folder_name,
    };

    let name = name.replace(['.', '_'], " ");
    let name = RE_NAME_SEASON_MARKER.replace_all(&name, "");
    let name = RE_NAME_JUNK.replace_all(&name, "");
    let name = RE_SPACE_COLLAPSE.replace_all(&name, " ");
    let name = RE_GROUP_SUFFIX.replace(name.trim(), "");

    name.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_episode_filename(filename: &str) -> Option<EpisodeTag> {
        parse_with_season_hint(filename, None)
    }

    fn pair(filename: &str) -> Option<(u32, u32)> {
        parse_episode_filename(filename).map(|t| (t.season, t.episode))
    }

    #[test]
    fn test_parse_standard_episode() {
        assert_eq!(pair("Show.Name.S01E01.Pilot.mkv"), Some((1, 1)));
        assert_eq!(pair("Breaking Bad s02e10 720p.mkv"), Some((2, 10)));
        assert_eq!(pair("show_S3_E7_[HDTV].avi"), Some((3, 7)));
        assert_eq!(pair("Show - S01.E105 - Long.mp4"), Some((1, 105)));
        assert_eq!(pair("[Group] Show S1E2 (1080p x265).mkv"), Some((1, 2)));

        let tag = parse_episode_filename("Show.S01E01.mkv").unwrap();
        assert_eq!(tag.rule, MatchRule::SeasonEpisode);
        assert_eq!(tag.confidence, ParseConfidence::Exact);
    }

    #[test]
    fn test_parse_cross_format() {
        assert_eq!(pair("Show 1x01 Title.avi"), Some((1, 1)));
        assert_eq!(pair("show.12X104.mkv"), Some((12, 104)));
        assert_eq!(
            parse_episode_filename("Show 2x05.mkv").map(|t| t.rule),
            Some(MatchRule::Cross)
        );
    }

    #[test]
    fn test_season_episode_needs_digit_boundary() {
        assert_eq!(pair("Show.S01E1000.mkv"), None);
        assert_eq!(pair("Serie T01E1234.mkv"), None);
        assert_eq!(pair("Show.S01E01E02.mkv"), Some((1, 1)));
    }

    #[test]
    fn test_season_source() {
        let tag = parse_episode_filename("Show.S02E03.mkv").unwrap();
        assert_eq!(tag.season_source, SeasonSource::FileName);
        let tag = parse_episode_filename("Serie Capitulo 07.avi").unwrap();
        assert_eq!(tag.season_source, SeasonSource::Default);
        let tag = parse_with_season_hint("Serie Capitulo 07.avi", Some(3)).unwrap();
        assert_eq!(tag.season_source, SeasonSource::Folder);
        let tag = parse_episode_filename("Serie Cap.401.avi").unwrap();
        assert_eq!(tag.season_source, SeasonSource::FileName);
    }

    #[test]
    fn test_resolution_is_not_cross_format() {
        assert_eq!(pair("Holiday 1920x1080.mkv"), None);
    }

    #[test]
    fn test_parse_spanish_long_forms() {
        assert_eq!(pair("Serie T02E05.mkv"), Some((2, 5)));
        assert_eq!(pair("Serie Temporada 3 Capitulo 12.avi"), Some((3, 12)));
        assert_eq!(pair("Serie.Temp.1.Ep.4.avi"), Some((1, 4)));
        assert_eq!(pair("Show Season 2 - Episode 9.mkv"), Some((2, 9)));
    }

    #[test]
    fn test_parse_episode_markers_default_season() {
        assert_eq!(pair("Serie Capitulo 07 [HDTV].avi"), Some((1, 7)));
        assert_eq!(pair("Serie Capítulo 5.mkv"), Some((1, 5)));
        assert_eq!(pair("Show Episode 3.mkv"), Some((1, 3)));
        assert_eq!(pair("Show.Ep.11.mkv"), Some((1, 11)));
        assert_eq!(pair("Show - E08 [1080p].mkv"), Some((1, 8)));

        let tag = parse_episode_filename("Show Episode 3.mkv").unwrap();
        assert_eq!(tag.rule, MatchRule::EpisodeMarker);
        assert_eq!(tag.confidence, ParseConfidence::Exact);
    }

    #[test]
    fn test_episode_marker_uses_season_hint() {
        let tag = parse_with_season_hint("Capitulo 03.avi", Some(4)).unwrap();
        assert_eq!((tag.season, tag.episode), (4, 3));

        // Explicit season in the name wins over the hint
        let tag = parse_with_season_hint("Show S02E03.mkv", Some(4)).unwrap();
        assert_eq!((tag.season, tag.episode), (2, 3));
    }

    #[test]
    fn test_chapter_number_fuzzy_split() {
        let tag = parse_episode_filename("Serie Cap.401.avi").unwrap();
        assert_eq!((tag.season, tag.episode), (4, 1));
        assert_eq!(tag.confidence, ParseConfidence::Ambiguous);

        assert_eq!(pair("Serie Cap.1205.avi"), Some((12, 5)));
    }

    #[test]
    fn test_bare_digit_fallback() {
        let tag = parse_episode_filename("101 - something.avi").unwrap();
        assert_eq!((tag.season, tag.episode), (1, 1));
        assert_eq!(tag.rule, MatchRule::BareNumber);
        assert_eq!(tag.confidence, ParseConfidence::Ambiguous);

        assert_eq!(pair("Series Name - 05 [720p].mkv"), Some((1, 5)));
        assert_eq!(pair("Series.Name.2019.05.mkv"), Some((1, 5)));
        assert_eq!(pair("Series.Name.203.mkv"), Some((2, 3)));
    }

    #[test]
    fn test_priority_beats_position() {
        // Bare number comes first but the SxxExx rule has priority
        assert_eq!(pair("101 Show S03E04.mkv"), Some((3, 4)));
        // Marker rule beats an earlier bare number
        assert_eq!(pair("Show 205 Episode 6.mkv"), Some((1, 6)));
    }

    #[test]
    fn test_no_wrong_guess() {
        assert_eq!(pair("holiday video.mkv"), None);
        assert_eq!(pair("Movie (2019) 1080p x264.mkv"), None);
        assert_eq!(pair("2024.mkv"), None);
        assert_eq!(pair("Concert 720 576.mkv"), None);
        assert_eq!(pair("Escape Plan.mkv"), None);
        assert_eq!(pair("Sample.mkv"), None);
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("Show.S01E01.mkv"), "Show.S01E01");
        assert_eq!(strip_extension("Show Season.1"), "Show Season.1");
        assert_eq!(strip_extension("noext"), "noext");
        assert_eq!(strip_extension(".hidden"), ".hidden");
    }

    #[test]
    fn test_season_from_text() {
        assert_eq!(season_from_text("Season 4"), Some(4));
        assert_eq!(season_from_text("Temporada 2"), Some(2));
        assert_eq!(season_from_text("Serie.S03.720p"), Some(3));
        assert_eq!(season_from_text("T5"), Some(5));
        assert_eq!(season_from_text("Extras"), None);
        assert_eq!(season_from_text("Season 99"), None);
    }

    #[test]
    fn test_guess_series_name() {
        assert_eq!(
            guess_series_name("Breaking.Bad.S02.720p.BluRay.x264-GRP"),
            "Breaking Bad"
        );
        assert_eq!(guess_series_name("The Office [Complete] (2005)"), "The Office");
        assert_eq!(guess_series_name("Serie Temporada 3"), "Serie");
        assert_eq!(guess_series_name("Show.Name.S01E01.Pilot"), "Show Name");
    }
}
