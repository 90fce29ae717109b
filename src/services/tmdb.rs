// TMDB metadata provider service
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::TMDB_API_BASE;
use crate::error::ProviderError;
use crate::models::{EpisodeMap, EpisodeRecord, SeriesCandidate};

use super::provider::{http_client, ExternalIdKind, MetadataProvider, PROVIDER_TIMEOUT};

const PROVIDER: &str = "TMDB";

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    api_key: String,
    language: String,
    base_url: String,
}

/// Search result for TV shows
#[derive(Debug, Deserialize)]
pub struct TvSearchResults {
    #[serde(default)]
    pub results: Vec<TvSearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct TvSearchResult {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub first_air_date: Option<String>,
}

/// Detailed TV show info; only the season list is needed
#[derive(Debug, Deserialize)]
pub struct TvDetails {
    pub name: String,
    pub number_of_seasons: Option<u32>,
    pub seasons: Option<Vec<SeasonSummary>>,
}

#[derive(Debug, Deserialize)]
pub struct SeasonSummary {
    pub season_number: u32,
}

/// Season details
#[derive(Debug, Deserialize)]
pub struct SeasonDetails {
    pub season_number: u32,
    pub episodes: Option<Vec<EpisodeInfo>>,
}

/// Episode info from season details
#[derive(Debug, Deserialize)]
pub struct EpisodeInfo {
    pub name: Option<String>,
    pub episode_number: u32,
    pub season_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TmdbErrorBody {
    status_message: Option<String>,
}

/// Year of a TMDB "YYYY-MM-DD" date
fn year_of(date: Option<&str>) -> Option<i32> {
    NaiveDate::parse_from_str(date?, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

impl TmdbClient {
    /// Create a new TMDB client returning titles in `language`
    pub fn new(api_key: String, language: String) -> Self {
        Self {
            client: http_client(PROVIDER_TIMEOUT),
            api_key,
            language,
            base_url: TMDB_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// GET a TMDB resource; `Ok(None)` means 404
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let message = response
                .json::<TmdbErrorBody>()
                .await
                .ok()
                .and_then(|b| b.status_message)
                .unwrap_or_else(|| status.to_string());
            tracing::warn!("TMDB request failed: {} - {}", status, message);

            return Err(match status {
                StatusCode::UNAUTHORIZED => ProviderError::Unauthorized {
                    provider: PROVIDER,
                    message,
                },
                _ => ProviderError::unavailable(PROVIDER, format!("HTTP {}: {}", status, message)),
            });
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ProviderError::unavailable(PROVIDER, format!("bad response: {}", e)))
    }

    /// Search for TV shows by name
    pub async fn search_tv(&self, query: &str) -> Result<Vec<TvSearchResult>, ProviderError> {
        let url = format!(
            "{}/search/tv?api_key={}&query={}&language={}&include_adult=false",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(query),
            urlencoding::encode(&self.language)
        );

        tracing::debug!("TMDB search: {}", query);
        let response: Option<TvSearchResults> = self.get_json(&url).await?;
        Ok(response.map(|r| r.results).unwrap_or_default())
    }

    /// Get TV show details (season list)
    pub async fn get_tv_details(&self, tv_id: &str) -> Result<Option<TvDetails>, ProviderError> {
        let url = format!(
            "{}/tv/{}?api_key={}&language={}",
            self.base_url,
            urlencoding::encode(tv_id),
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.language)
        );
        self.get_json(&url).await
    }

    /// Get season details including episode list
    pub async fn get_season_details(
        &self,
        tv_id: &str,
        season_number: u32,
    ) -> Result<Option<SeasonDetails>, ProviderError> {
        let url = format!(
            "{}/tv/{}/season/{}?api_key={}&language={}",
            self.base_url,
            urlencoding::encode(tv_id),
            season_number,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.language)
        );
        self.get_json(&url).await
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn native_language(&self) -> &str {
        &self.language
    }

    fn id_kind(&self) -> ExternalIdKind {
        ExternalIdKind::TmdbTv
    }

    async fn search(&self, query: &str) -> Result<Vec<SeriesCandidate>, ProviderError> {
        let results = self.search_tv(query).await?;

        Ok(results
            .into_iter()
            .map(|r| SeriesCandidate {
                external_id: r.id.to_string(),
                first_air_year: year_of(r.first_air_date.as_deref()),
                original_title: r.original_name.filter(|n| *n != r.name),
                overview: r.overview.filter(|o| !o.is_empty()),
                display_title: r.name,
            })
            .collect())
    }

    async fn fetch_episodes(&self, series_id: &str) -> Result<EpisodeMap, ProviderError> {
        let details =
            self.get_tv_details(series_id)
                .await?
                .ok_or_else(|| ProviderError::SeriesNotFound {
                    provider: PROVIDER,
                    series_id: series_id.to_string(),
                })?;

        let seasons: Vec<u32> = match details.seasons {
            Some(list) if !list.is_empty() => list.into_iter().map(|s| s.season_number).collect(),
            _ => (1..=details.number_of_seasons.unwrap_or(0)).collect(),
        };

        tracing::info!(
            "Fetching {} season(s) of '{}' from TMDB",
            seasons.len(),
            details.name
        );

        let mut episodes = EpisodeMap::new();
        for season_number in seasons {
            let Some(season) = self.get_season_details(series_id, season_number).await? else {
                tracing::debug!("TMDB season {} not found, skipping", season_number);
                continue;
            };

            for ep in season.episodes.unwrap_or_default() {
                let season_no = ep.season_number.unwrap_or(season.season_number);
                episodes.insert(
                    (season_no, ep.episode_number),
                    EpisodeRecord {
                        season: season_no,
                        episode: ep.episode_number,
                        title: ep.name.unwrap_or_default().trim().to_string(),
                        source_language: self.language.clone(),
                        external_id: None,
                    },
                );
            }
        }

        tracing::debug!("TMDB returned {} episodes for {}", episodes.len(), series_id);
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::spawn_server;

    #[test]
    fn test_parse_search_response() {
        let json = r#"{
            "page": 1,
            "results": [
                {"id": 1396, "name": "Breaking Bad", "original_name": "Breaking Bad",
                 "overview": "A chemistry teacher...", "first_air_date": "2008-01-20",
                 "poster_path": "/x.jpg"},
                {"id": 99, "name": "Other", "first_air_date": ""}
            ],
            "total_results": 2
        }"#;
        let parsed: TvSearchResults = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(year_of(parsed.results[0].first_air_date.as_deref()), Some(2008));
        assert_eq!(year_of(parsed.results[1].first_air_date.as_deref()), None);
    }

    #[tokio::test]
    async fn test_search_maps_candidates() {
        let base = spawn_server(vec![(
            "/search/tv?",
            200,
            r#"{"results":[{"id":1396,"name":"Breaking Bad","original_name":"Breaking Bad","first_air_date":"2008-01-20"}]}"#.to_string(),
        )])
        .await;

        let client = TmdbClient::new("key".into(), "es-ES".into()).with_base_url(base);
        let results = client.search("breaking bad").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].external_id, "1396");
        assert_eq!(results[0].first_air_year, Some(2008));
        assert_eq!(results[0].original_title, None);
        assert_eq!(results[0].to_string(), "Breaking Bad (2008)");
    }

    #[tokio::test]
    async fn test_empty_search_is_not_an_error() {
        let base = spawn_server(vec![("/search/tv?", 200, r#"{"results":[]}"#.to_string())]).await;
        let client = TmdbClient::new("key".into(), "es-ES".into()).with_base_url(base);
        assert!(client.search("zzzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_is_unauthorized() {
        let base = spawn_server(vec![(
            "/search/tv?",
            401,
            r#"{"status_code":7,"status_message":"Invalid API key: You must be granted a valid key."}"#
                .to_string(),
        )])
        .await;
        let client = TmdbClient::new("bad".into(), "es-ES".into()).with_base_url(base);
        let err = client.search("anything").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized { .. }));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let base = spawn_server(vec![("/search/tv?", 503, "{}".to_string())]).await;
        let client = TmdbClient::new("key".into(), "es-ES".into()).with_base_url(base);
        let err = client.search("anything").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_episodes_skips_missing_season() {
        let base = spawn_server(vec![
            (
                "/tv/42/season/1?",
                200,
                r#"{"season_number":1,"episodes":[
                    {"id":1,"name":"Piloto","episode_number":1,"season_number":1},
                    {"id":2,"name":"El gato está en la bolsa","episode_number":2,"season_number":1}
                ]}"#
                .to_string(),
            ),
            // season 2 falls through to the default 404
            (
                "/tv/42?",
                200,
                r#"{"id":42,"name":"Mi Serie","number_of_seasons":2,
                    "seasons":[{"season_number":1},{"season_number":2}]}"#
                    .to_string(),
            ),
        ])
        .await;

        let client = TmdbClient::new("key".into(), "es-ES".into()).with_base_url(base);
        let episodes = client.fetch_episodes("42").await.unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[&(1, 1)].title, "Piloto");
        assert_eq!(episodes[&(1, 2)].source_language, "es-ES");
    }

    #[tokio::test]
    async fn test_unknown_series_is_not_found() {
        let base = spawn_server(vec![]).await;
        let client = TmdbClient::new("key".into(), "es-ES".into()).with_base_url(base);
        let err = client.fetch_episodes("777").await.unwrap_err();
        assert!(matches!(err, ProviderError::SeriesNotFound { .. }));
    }

    #[tokio::test]
    async fn test_api_key_is_url_encoded() {
        let base = spawn_server(vec![(
            "api_key=k%26ey%3D1&",
            200,
            r#"{"results":[{"id":7,"name":"Dark"}]}"#.to_string(),
        )])
        .await;
        let client = TmdbClient::new("k&ey=1".into(), "es-ES".into()).with_base_url(base);
        let results = client.search("dark").await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
