// Wikidata title localizer
// Translates series and episode titles through the public SPARQL endpoint.
// Every failure here is soft: titles stay as the provider returned them.

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::WIKIDATA_SPARQL_URL;
use crate::models::EpisodeMap;

use super::provider::{http_client, language_base, ExternalIdKind};

/// Episode IMDb ids per fallback query
const BATCH_SIZE: usize = 200;
const TIMEOUT: Duration = Duration::from_secs(30);

static RE_QID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Q\d+$").unwrap());
static RE_ENTITY_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/entity/(Q\d+)$").unwrap());

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlValue>>,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

type Row = HashMap<String, SparqlValue>;

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).map(|v| v.value.as_str())
}

/// Summary of one localization pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalizationReport {
    pub translated: usize,
    pub untranslated: usize,
    pub failed_queries: usize,
    /// Series label in the target language, when Wikidata has one
    pub series_title: Option<String>,
}

impl LocalizationReport {
    pub fn is_degraded(&self) -> bool {
        self.failed_queries > 0
    }
}

pub struct Localizer {
    client: Client,
    endpoint: String,
    /// Base language subtag used for label lookups ("es")
    language: String,
}

impl Localizer {
    pub fn new(language: &str) -> Self {
        Self {
            client: http_client(TIMEOUT),
            endpoint: WIKIDATA_SPARQL_URL.to_string(),
            language: language_base(language),
        }
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Replace titles in `episodes` with target-language labels where found
    ///
    /// Records without a translation keep their title. Stops early, leaving
    /// the rest untouched, once `cancel` fires.
    pub async fn localize(
        &self,
        episodes: &mut EpisodeMap,
        series_id: &str,
        id_kind: ExternalIdKind,
        cancel: &CancellationToken,
    ) -> LocalizationReport {
        let mut report = LocalizationReport::default();
        let mut translated_keys = std::collections::HashSet::new();

        if !is_safe_literal(series_id) || !is_safe_literal(&self.language) {
            tracing::warn!("Not localizing: unusable series id '{}'", series_id);
            report.untranslated = episodes.len();
            return report;
        }

        // Series node and its label
        let series_node = match self.find_series(series_id, id_kind).await {
            Ok(Some((qid, label))) => {
                report.series_title = label;
                Some(qid)
            }
            Ok(None) => {
                tracing::debug!("No Wikidata item for series {}", series_id);
                None
            }
            Err(e) => {
                tracing::warn!("Wikidata series lookup failed: {}", e);
                report.failed_queries += 1;
                None
            }
        };

        // Episodes joined by season/episode ordinals
        if let Some(qid) = series_node.filter(|_| !cancel.is_cancelled()) {
            match self.episode_labels_by_ordinal(&qid).await {
                Ok(labels) => {
                    for ((season, episode), label) in labels {
                        if cancel.is_cancelled() {
                            break;
                        }
                        if let Some(record) = episodes.get_mut(&(season, episode)) {
                            record.title = label;
                            record.source_language = self.language.clone();
                            translated_keys.insert((season, episode));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Wikidata episode lookup failed: {}", e);
                    report.failed_queries += 1;
                }
            }
        }

        // Remaining episodes that carry their own IMDb id
        let pending: Vec<((u32, u32), String)> = episodes
            .iter()
            .filter(|(key, _)| !translated_keys.contains(*key))
            .filter_map(|(key, record)| {
                record
                    .external_id
                    .as_ref()
                    .filter(|id| is_safe_literal(id))
                    .map(|id| (*key, id.clone()))
            })
            .collect();

        for batch in pending.chunks(BATCH_SIZE) {
            if cancel.is_cancelled() {
                break;
            }
            let ids: Vec<&str> = batch.iter().map(|(_, id)| id.as_str()).collect();
            match self.labels_by_imdb(&ids).await {
                Ok(labels) => {
                    for (key, id) in batch {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let (Some(label), Some(record)) = (labels.get(id), episodes.get_mut(key))
                        else {
                            continue;
                        };
                        record.title = label.clone();
                        record.source_language = self.language.clone();
                        translated_keys.insert(*key);
                    }
                }
                Err(e) => {
                    tracing::warn!("Wikidata IMDb batch lookup failed: {}", e);
                    report.failed_queries += 1;
                }
            }
        }

        report.translated = translated_keys.len();
        report.untranslated = episodes.len() - report.translated;

        tracing::info!(
            "Localized {} of {} episode titles to '{}' ({} failed queries)",
            report.translated,
            episodes.len(),
            self.language,
            report.failed_queries
        );
        report
    }

    /// Find the series item by external id; returns (Q-id, label)
    async fn find_series(
        &self,
        series_id: &str,
        id_kind: ExternalIdKind,
    ) -> Result<Option<(String, Option<String>)>, reqwest::Error> {
        let sparql = format!(
            "SELECT ?item ?label WHERE {{\n  ?item wdt:{} \"{}\" .\n  OPTIONAL {{ ?item rdfs:label ?label . FILTER(LANG(?label) = \"{}\") }}\n}} LIMIT 1\n",
            id_kind.wikidata_property(),
            series_id,
            self.language
        );

        let rows = self.query(&sparql).await?;
        Ok(rows.first().and_then(|row| {
            let qid = RE_ENTITY_URI
                .captures(field(row, "item")?)?
                .get(1)?
                .as_str()
                .to_string();
            Some((qid, field(row, "label").and_then(usable_label)))
        }))
    }

    /// Labels of every episode of `series_qid` that has season and episode ordinals
    async fn episode_labels_by_ordinal(
        &self,
        series_qid: &str,
    ) -> Result<Vec<((u32, u32), String)>, reqwest::Error> {
        let sparql = format!(
            "SELECT ?season ?episode ?label WHERE {{\n  \
             ?ep wdt:P179 wd:{qid} ;\n      p:P4908 ?inSeason .\n  \
             ?inSeason ps:P4908 ?seasonItem ;\n            pq:P1545 ?episode .\n  \
             ?seasonItem p:P179 ?inSeries .\n  \
             ?inSeries ps:P179 wd:{qid} ;\n            pq:P1545 ?season .\n  \
             ?ep rdfs:label ?label . FILTER(LANG(?label) = \"{lang}\")\n}}\n",
            qid = series_qid,
            lang = self.language
        );

        let rows = self.query(&sparql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let season = field(row, "season")?.trim().parse().ok()?;
                let episode = field(row, "episode")?.trim().parse().ok()?;
                let label = usable_label(field(row, "label")?)?;
                Some(((season, episode), label))
            })
            .collect())
    }

    /// Labels of items by IMDb id, keyed by the id
    async fn labels_by_imdb(&self, ids: &[&str]) -> Result<HashMap<String, String>, reqwest::Error> {
        let values = ids
            .iter()
            .map(|id| format!("\"{}\"", id))
            .collect::<Vec<_>>()
            .join(" ");
        let sparql = format!(
            "SELECT ?imdbId ?label WHERE {{\n  VALUES ?imdbId {{ {} }}\n  ?item wdt:P345 ?imdbId .\n  ?item rdfs:label ?label . FILTER(LANG(?label) = \"{}\")\n}}\n",
            values, self.language
        );

        let rows = self.query(&sparql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = field(row, "imdbId")?.to_string();
                let label = usable_label(field(row, "label")?)?;
                Some((id, label))
            })
            .collect())
    }

    async fn query(&self, sparql: &str) -> Result<Vec<Row>, reqwest::Error> {
        let response: SparqlResponse = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/sparql-results+json")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(format!("query={}", urlencoding::encode(sparql)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.results.bindings)
    }
}

/// Ids and language tags are interpolated into SPARQL string literals
fn is_safe_literal(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Wikidata falls back to the bare Q-id when an item has no label
fn usable_label(label: &str) -> Option<String> {
    let label = label.trim();
    if label.is_empty() || RE_QID.is_match(label) {
        return None;
    }
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EpisodeRecord;
    use crate::services::test_support::spawn_server;

    fn english_map() -> EpisodeMap {
        let mut map = EpisodeMap::new();
        for (episode, title, id) in [(1, "Pilot", "tt0959621"), (2, "Cat's in the Bag...", "tt1054724")] {
            map.insert(
                (1, episode),
                EpisodeRecord {
                    season: 1,
                    episode,
                    title: title.to_string(),
                    source_language: "en".to_string(),
                    external_id: Some(id.to_string()),
                },
            );
        }
        map
    }

    #[test]
    fn test_usable_label() {
        assert_eq!(usable_label("Q12345"), None);
        assert_eq!(usable_label("  "), None);
        assert_eq!(usable_label("Piloto"), Some("Piloto".to_string()));
    }

    #[test]
    fn test_safe_literal() {
        assert!(is_safe_literal("tt0903747"));
        assert!(is_safe_literal("1396"));
        assert!(!is_safe_literal("tt1\" } DROP"));
        assert!(!is_safe_literal(""));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_keeps_titles() {
        // Bind and drop a listener so the port is closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let localizer =
            Localizer::new("es-ES").with_endpoint(format!("http://127.0.0.1:{}/sparql", port));
        let mut episodes = english_map();
        let report = localizer
            .localize(&mut episodes, "tt0903747", ExternalIdKind::Imdb, &CancellationToken::new())
            .await;

        assert_eq!(report.translated, 0);
        assert_eq!(report.untranslated, 2);
        assert!(report.is_degraded());
        assert_eq!(report.series_title, None);
        assert_eq!(episodes[&(1, 1)].title, "Pilot");
        assert_eq!(episodes[&(1, 2)].source_language, "en");
    }

    #[tokio::test]
    async fn test_partial_translation_through_imdb_batch() {
        // The same canned body answers every query: no series item, and one
        // IMDb-keyed episode label
        let body = r#"{"head":{"vars":["imdbId","label"]},"results":{"bindings":[
            {"imdbId":{"type":"literal","value":"tt0959621"},
             "label":{"xml:lang":"es","type":"literal","value":"Piloto"}}
        ]}}"#;
        let base = spawn_server(vec![("POST /sparql", 200, body.to_string())]).await;

        let localizer = Localizer::new("es-ES").with_endpoint(format!("{}/sparql", base));
        let mut episodes = english_map();
        let report = localizer
            .localize(&mut episodes, "tt0903747", ExternalIdKind::Imdb, &CancellationToken::new())
            .await;

        assert_eq!(report.translated, 1);
        assert_eq!(report.untranslated, 1);
        assert_eq!(report.failed_queries, 0);
        assert_eq!(episodes[&(1, 1)].title, "Piloto");
        assert_eq!(episodes[&(1, 1)].source_language, "es");
        assert_eq!(episodes[&(1, 2)].title, "Cat's in the Bag...");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_translates_nothing() {
        let base = spawn_server(vec![]).await;
        let localizer = Localizer::new("es").with_endpoint(format!("{}/sparql", base));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut episodes = english_map();
        let report = localizer
            .localize(&mut episodes, "tt0903747", ExternalIdKind::Imdb, &cancel)
            .await;
        assert_eq!(report.translated, 0);
        assert_eq!(episodes[&(1, 1)].title, "Pilot");
    }
}
